use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("roomd")
        .password("roomd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn base_date() -> NaiveDate {
    chrono::Utc::now().date_naive() + Days::new(1)
}

/// Single-night stay starting `i` days out, as (check_in, check_out) strings.
fn stay(i: u64) -> (String, String) {
    let check_in = base_date() + Days::new(i);
    let check_out = check_in + Days::new(1);
    (
        check_in.format("%Y-%m-%d").to_string(),
        check_out.format("%Y-%m-%d").to_string(),
    )
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

struct RoomType {
    id: Ulid,
    rooms: u32,
}

async fn create_room_type(client: &tokio_postgres::Client, rt: Ulid, rooms: u32) {
    let hotel = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO room_types (id, hotel_id, name) VALUES ('{rt}', '{hotel}', 'bench')"
        ))
        .await
        .unwrap();
    for i in 0..rooms {
        let room = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, room_type_id, name) VALUES ('{room}', '{rt}', '{i}')"
            ))
            .await
            .unwrap();
    }
}

async fn reserve(client: &tokio_postgres::Client, rt: Ulid, day: u64) {
    let (ci, co) = stay(day);
    let user = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (room_type_id, count, check_in, check_out, total, user_id) \
             VALUES ('{rt}', 1, '{ci}', '{co}', 10000, '{user}')"
        ))
        .await
        .unwrap();
}

async fn setup(client: &tokio_postgres::Client) -> Vec<RoomType> {
    let room_counts = [1, 1, 1, 1, 1, 5, 5, 5, 10, 10];
    let mut types = Vec::new();

    for &rooms in &room_counts {
        let rt = Ulid::new();
        create_room_type(client, rt, rooms).await;
        types.push(RoomType { id: rt, rooms });
    }

    println!("  created {} room types", types.len());
    types
}

async fn phase1_sequential(host: &str, port: u16, room_type: &RoomType) {
    let client = connect(host, port).await;
    let rt = room_type.id;

    // Re-create the room type in this tenant
    create_room_type(&client, rt, room_type.rooms).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        reserve(&client, rt, (i % 2000) as u64).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16, room_types: &[RoomType]) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let rt = room_types[i % room_types.len()].id;
        let rooms = room_types[i % room_types.len()].rooms;

        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;

            // Each task uses its own tenant (unique dbname from connect())
            create_room_type(&client, rt, rooms).await;

            for j in 0..n_per_task {
                reserve(&client, rt, j as u64).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously reserve in the background, each in its own tenant
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let wrt = Ulid::new();
            create_room_type(&client, wrt, 10).await;
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let (ci, co) = stay(i % 3000);
                let user = Ulid::new();
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (room_type_id, count, check_in, check_out, total, user_id) \
                         VALUES ('{wrt}', 1, '{ci}', '{co}', 10000, '{user}')"
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    // Reader tasks: query availability and measure latency, each against its own data
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let rrt = Ulid::new();
            create_room_type(&client, rrt, 10).await;
            // Book a few rooms so the availability scan is non-trivial
            for i in 0..50 {
                reserve(&client, rrt, i).await;
            }

            let (ci, co) = stay(10);
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM availability WHERE room_type_id = '{rrt}' \
                         AND check_in = '{ci}' AND check_out = '{co}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let rt = Ulid::new();
            create_room_type(&client, rt, 10).await;

            for i in 0..ops_per_conn {
                reserve(&client, rt, i).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMD_PORT")
        .unwrap_or_else(|_| "5439".into())
        .parse()
        .expect("invalid ROOMD_PORT");

    println!("=== roomd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let room_types = setup(&setup_client).await;
    drop(setup_client);

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&host, port, &room_types[9]).await; // 10-room type

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port, &room_types).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
