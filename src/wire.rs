use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::RoomdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct RoomdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoomdQueryParser>,
}

impl RoomdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoomdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertRoomType { id, hotel_id, name } => {
                engine
                    .create_room_type(id, hotel_id, name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoomType { id, name } => {
                engine.update_room_type(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteRoomType { id } => {
                engine.delete_room_type(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertRoom {
                id,
                room_type_id,
                name,
                status,
            } => {
                engine
                    .add_room(id, room_type_id, name, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine.remove_room(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::UpdateRoomStatus { room_ids, status } => {
                let n = engine
                    .set_room_status(&room_ids, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(n))])
            }
            Command::InsertReservation {
                lines,
                stay,
                total_minor,
                user_id,
            } => {
                let created = engine
                    .create_reservation(&lines, stay, total_minor, user_id)
                    .await
                    .map_err(engine_err)?;

                // One result row per booked room, so the caller learns the
                // generated booking ids and room assignments.
                let schema = Arc::new(reservation_schema());
                let rows: Vec<PgWireResult<_>> = created
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.room_type_id.to_string())?;
                        encoder.encode_field(&b.room_id.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::DeleteBookings { ids } => {
                let n = engine.delete_bookings(&ids).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(n))])
            }
            Command::SelectAvailability {
                room_type_id,
                stay,
                limit,
            } => {
                let free = engine
                    .available_rooms(&room_type_id, &stay, limit)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let type_str = room_type_id.to_string();
                let rows: Vec<PgWireResult<_>> = free
                    .into_iter()
                    .map(|room_id| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&type_str)?;
                        encoder.encode_field(&room_id.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOccupancy { room_type_ids, stay } => {
                let counts = engine
                    .occupancy_counts(&room_type_ids, &stay)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(occupancy_schema());
                let rows: Vec<PgWireResult<_>> = counts
                    .into_iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.room_type_id.to_string())?;
                        encoder.encode_field(&(o.total_rooms as i32))?;
                        encoder.encode_field(&(o.free_rooms as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRoomTypes => {
                let types = engine.list_room_types().await;
                let schema = Arc::new(room_types_schema());
                let rows: Vec<PgWireResult<_>> = types
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.hotel_id.to_string())?;
                        encoder.encode_field(&t.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms { room_type_id } => {
                let rooms = engine.get_rooms(&room_type_id).await.map_err(engine_err)?;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.room_type_id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings {
                room_type_id,
                user_id,
            } => {
                let bookings = match (room_type_id, user_id) {
                    (Some(type_id), _) => {
                        engine.get_bookings(&type_id).await.map_err(engine_err)?
                    }
                    (None, Some(user)) => engine.get_bookings_for_user(&user).await,
                    (None, None) => unreachable!("parser requires a filter"),
                };

                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.room_type_id.to_string())?;
                        encoder.encode_field(&b.room_id.to_string())?;
                        encoder.encode_field(&b.user_id.to_string())?;
                        encoder.encode_field(&b.stay.check_in.to_string())?;
                        encoder.encode_field(&b.stay.check_out.to_string())?;
                        encoder.encode_field(&b.total_minor)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let type_id_str = channel.strip_prefix("room_type_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected room_type_{{id}})"),
                    )))
                })?;
                let _type_id = Ulid::from_string(type_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![varchar("room_type_id"), varchar("room_id")]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![varchar("booking_id"), varchar("room_type_id"), varchar("room_id")]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        varchar("room_type_id"),
        FieldInfo::new("total_rooms".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("free_rooms".into(), None, None, Type::INT4, FieldFormat::Text),
    ]
}

fn room_types_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("hotel_id"), varchar("name")]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("room_type_id"), varchar("name"), varchar("status")]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("room_type_id"),
        varchar("room_id"),
        varchar("user_id"),
        varchar("check_in"),
        varchar("check_out"),
        FieldInfo::new("total".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

/// Schema for Describe, inferred from the statement text. The parser is
/// not available at describe time, so this matches on table keywords.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("OCCUPANCY") {
        occupancy_schema()
    } else if upper.contains("INSERT") && upper.contains("RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("SELECT") && upper.contains("ROOM_TYPES") {
        room_types_schema()
    } else if upper.contains("SELECT") && upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("SELECT") && upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomdQueryParser;

#[async_trait]
impl QueryParser for RoomdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomdHandler {
    type Statement = String;
    type QueryParser = RoomdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    render_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over the original statement. Substituted values
/// are never rescanned, so a bound value containing a `$N` token stays
/// literal. Unknown or out-of-range placeholders pass through untouched.
fn render_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let index = after[..digits]
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=params.len()).contains(n));
        match index {
            Some(n) => {
                match &params[n - 1] {
                    Some(bytes) => {
                        let text = String::from_utf8_lossy(bytes.as_ref());
                        out.push('\'');
                        out.push_str(&text.replace('\'', "''"));
                        out.push('\'');
                    }
                    None => out.push_str("NULL"),
                }
                rest = &after[digits..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Factory / connection entry point ─────────────────────────────

pub struct RoomdFactory {
    handler: Arc<RoomdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RoomdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RoomdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = RoomdFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidArgument(_) => "22023",
        EngineError::InsufficientAvailability { .. } => "P0001",
        EngineError::Conflict(_) => "40001",
        EngineError::HasRooms(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(values: &[Option<&str>]) -> Vec<Option<Vec<u8>>> {
        values
            .iter()
            .map(|v| v.map(|s| s.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn render_params_quotes_and_escapes() {
        let sql = "UPDATE room_types SET name = $1 WHERE id = $2";
        let params = p(&[Some("O'Hare Suite"), Some("01ARZ3NDEKTSV4RRFFQ69G5FAV")]);
        assert_eq!(
            render_params(sql, &params),
            "UPDATE room_types SET name = 'O''Hare Suite' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"
        );
    }

    #[test]
    fn render_params_leaves_placeholder_tokens_in_values_alone() {
        // A value that itself looks like a placeholder must not be
        // rewritten by a later substitution
        let sql = "UPDATE room_types SET name = $2 WHERE id = $1";
        let params = p(&[Some("id-$2"), Some("name with $1 inside")]);
        assert_eq!(
            render_params(sql, &params),
            "UPDATE room_types SET name = 'name with $1 inside' WHERE id = 'id-$2'"
        );
    }

    #[test]
    fn render_params_handles_null_and_out_of_range() {
        let sql = "INSERT INTO room_types VALUES ($1, $2, $3, $9)";
        let params = p(&[Some("a"), None, Some("c")]);
        assert_eq!(
            render_params(sql, &params),
            "INSERT INTO room_types VALUES ('a', NULL, 'c', $9)"
        );
        // A bare dollar sign is not a placeholder
        assert_eq!(render_params("SELECT '$'", &params), "SELECT '$'");
    }

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("WHERE id = $1 AND user_id = $3"), 3);
        assert_eq!(count_params("VALUES ($2, $10)"), 10);
    }
}
