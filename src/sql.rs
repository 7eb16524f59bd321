use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoomType {
        id: Ulid,
        hotel_id: Ulid,
        name: Option<String>,
    },
    UpdateRoomType {
        id: Ulid,
        name: Option<String>,
    },
    DeleteRoomType {
        id: Ulid,
    },
    InsertRoom {
        id: Ulid,
        room_type_id: Ulid,
        name: String,
        status: RoomStatus,
    },
    DeleteRoom {
        id: Ulid,
    },
    UpdateRoomStatus {
        room_ids: Vec<Ulid>,
        status: RoomStatus,
    },
    /// Multi-row INSERT = one reservation spanning room types. All rows
    /// share the stay, total and user; each row contributes one line.
    InsertReservation {
        lines: Vec<ReservationLine>,
        stay: StayRange,
        total_minor: i64,
        user_id: Ulid,
    },
    DeleteBookings {
        ids: Vec<Ulid>,
    },
    SelectAvailability {
        room_type_id: Ulid,
        stay: StayRange,
        limit: Option<usize>,
    },
    SelectOccupancy {
        room_type_ids: Vec<Ulid>,
        stay: StayRange,
    },
    SelectRoomTypes,
    SelectRooms {
        room_type_id: Ulid,
    },
    SelectBookings {
        room_type_id: Option<Ulid>,
        user_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "room_types" => {
            let values = &rows[0];
            if values.len() < 2 {
                return Err(SqlError::WrongArity("room_types", 2, values.len()));
            }
            let name = if values.len() >= 3 {
                parse_string_or_null(&values[2])?
            } else {
                None
            };
            Ok(Command::InsertRoomType {
                id: parse_ulid(&values[0])?,
                hotel_id: parse_ulid(&values[1])?,
                name,
            })
        }
        "rooms" => {
            let values = &rows[0];
            if values.len() < 3 {
                return Err(SqlError::WrongArity("rooms", 3, values.len()));
            }
            let status = if values.len() >= 4 {
                parse_status(&values[3])?
            } else {
                RoomStatus::Free
            };
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                room_type_id: parse_ulid(&values[1])?,
                name: parse_string(&values[2])?,
                status,
            })
        }
        "reservations" => parse_insert_reservation(&rows),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Row shape: (room_type_id, count, check_in, check_out, total, user_id).
/// Every row must agree on stay, total and user — a reservation has one
/// guest, one stay and one price, however many room types it spans.
fn parse_insert_reservation(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut lines = Vec::with_capacity(rows.len());
    let mut shared: Option<(StayRange, i64, Ulid)> = None;

    for (i, row) in rows.iter().enumerate() {
        if row.len() < 6 {
            return Err(SqlError::WrongArity("reservations row", 6, row.len()));
        }
        let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        let line = ReservationLine {
            room_type_id: parse_ulid(&row[0]).map_err(row_err)?,
            count: parse_u32(&row[1]).map_err(row_err)?,
        };
        let stay = StayRange {
            check_in: parse_date(&row[2]).map_err(row_err)?,
            check_out: parse_date(&row[3]).map_err(row_err)?,
        };
        let total = parse_i64(&row[4]).map_err(row_err)?;
        let user = parse_ulid(&row[5]).map_err(row_err)?;

        match &shared {
            None => shared = Some((stay, total, user)),
            Some((s, t, u)) => {
                if *s != stay || *t != total || *u != user {
                    return Err(SqlError::Parse(
                        "reservation rows must share check_in, check_out, total and user_id".into(),
                    ));
                }
            }
        }
        lines.push(line);
    }

    let (stay, total_minor, user_id) = shared.ok_or(SqlError::Empty)?;
    Ok(Command::InsertReservation {
        lines,
        stay,
        total_minor,
        user_id,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let ids = extract_where_ids(&delete.selection)?;

    match table.as_str() {
        "room_types" => match ids.as_slice() {
            [id] => Ok(Command::DeleteRoomType { id: *id }),
            _ => Err(SqlError::Parse("DELETE FROM room_types takes one id".into())),
        },
        "rooms" => match ids.as_slice() {
            [id] => Ok(Command::DeleteRoom { id: *id }),
            _ => Err(SqlError::Parse("DELETE FROM rooms takes one id".into())),
        },
        "bookings" => Ok(Command::DeleteBookings { ids }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    match table.as_str() {
        "rooms" => {
            let status_expr = assignment_value(assignments, "status")
                .ok_or(SqlError::MissingFilter("status"))?;
            let status = parse_status(status_expr)?;
            let room_ids = extract_where_ids(selection)?;
            Ok(Command::UpdateRoomStatus { room_ids, status })
        }
        "room_types" => {
            let name_expr = assignment_value(assignments, "name")
                .ok_or(SqlError::MissingFilter("name"))?;
            let name = parse_string_or_null(name_expr)?;
            let ids = extract_where_ids(selection)?;
            match ids.as_slice() {
                [id] => Ok(Command::UpdateRoomType { id: *id, name }),
                _ => Err(SqlError::Parse("UPDATE room_types takes one id".into())),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }
    filters.limit = extract_limit(query)?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            room_type_id: single_type_id(&filters)?,
            stay: filters.stay()?,
            limit: filters.limit,
        }),
        "occupancy" => {
            if filters.room_type_ids.is_empty() {
                return Err(SqlError::MissingFilter("room_type_id"));
            }
            let stay = filters.stay()?;
            Ok(Command::SelectOccupancy {
                room_type_ids: filters.room_type_ids,
                stay,
            })
        }
        "room_types" => Ok(Command::SelectRoomTypes),
        "rooms" => Ok(Command::SelectRooms {
            room_type_id: single_type_id(&filters)?,
        }),
        "bookings" => {
            let room_type_id = match filters.room_type_ids.as_slice() {
                [] => None,
                [id] => Some(*id),
                _ => {
                    return Err(SqlError::Parse(
                        "SELECT FROM bookings takes one room_type_id".into(),
                    ))
                }
            };
            if room_type_id.is_none() && filters.user_id.is_none() {
                return Err(SqlError::MissingFilter("room_type_id or user_id"));
            }
            Ok(Command::SelectBookings {
                room_type_id,
                user_id: filters.user_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    room_type_ids: Vec<Ulid>,
    user_id: Option<Ulid>,
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
    limit: Option<usize>,
}

impl Filters {
    fn stay(&self) -> Result<StayRange, SqlError> {
        Ok(StayRange {
            check_in: self.check_in.ok_or(SqlError::MissingFilter("check_in"))?,
            check_out: self.check_out.ok_or(SqlError::MissingFilter("check_out"))?,
        })
    }
}

fn single_type_id(filters: &Filters) -> Result<Ulid, SqlError> {
    match filters.room_type_ids.as_slice() {
        [id] => Ok(*id),
        _ => Err(SqlError::MissingFilter("room_type_id")),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("room_type_id") => filters.room_type_ids.push(parse_ulid(right)?),
                Some("user_id") => filters.user_id = Some(parse_ulid(right)?),
                Some("check_in") => filters.check_in = Some(parse_date(right)?),
                Some("check_out") => filters.check_out = Some(parse_date(right)?),
                _ => {}
            },
            _ => {}
        },
        Expr::InList { expr, list, negated: false } => {
            if expr_column_name(expr).as_deref() == Some("room_type_id") {
                for item in list {
                    filters.room_type_ids.push(parse_ulid(item)?);
                }
            }
        }
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => {}
    }
    Ok(())
}

fn extract_limit(query: &ast::Query) -> Result<Option<usize>, SqlError> {
    let Some(ast::LimitClause::LimitOffset { limit: Some(expr), .. }) = &query.limit_clause else {
        return Ok(None);
    };
    let n = parse_i64(expr)?;
    let n = usize::try_from(n).map_err(|_| SqlError::Parse(format!("bad limit: {n}")))?;
    Ok(Some(n))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE id = '...'` or `WHERE id IN ('...', '...')`.
fn extract_where_ids(selection: &Option<Expr>) -> Result<Vec<Ulid>, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                Ok(vec![parse_ulid(right)?])
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        Expr::InList { expr, list, negated: false } => {
            if expr_column_name(expr).as_deref() == Some("id") {
                list.iter().map(parse_ulid).collect()
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn assignment_value<'a>(assignments: &'a [ast::Assignment], column: &str) -> Option<&'a Expr> {
    assignments.iter().find_map(|a| match &a.target {
        ast::AssignmentTarget::ColumnName(name)
            if object_name_last(name).as_deref() == Some(column) =>
        {
            Some(&a.value)
        }
        _ => None,
    })
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
    } else {
        Err(SqlError::Parse(format!("expected 'YYYY-MM-DD', got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        Ok(s.clone())
    } else {
        Err(SqlError::Parse(format!("expected string, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_string(expr)?;
    RoomStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad room status: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
