use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lens_adapters::memory::InMemoryQueryService;
use lens_adapters::mysql::MysqlQueryService;
use lens_core::history::HistoryStore;
use lens_core::query_service::RemoteQueryService;
use lens_core::settings::ConnectionSettings;
use lens_core::stream_session::FetchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Config,
    HelpRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Memory,
    Mysql,
}

#[derive(Debug, Clone)]
struct BenchmarkConfig {
    backend: Backend,
    host: String,
    port: u16,
    user: String,
    database: String,
    sql: String,
    page_size: usize,
    assert_first_page_ms: Option<f64>,
    assert_min_rows_per_sec: Option<f64>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            database: "lens_bench".to_string(),
            sql: "SELECT * FROM users".to_string(),
            page_size: 500,
            assert_first_page_ms: None,
            assert_min_rows_per_sec: None,
        }
    }
}

#[derive(Debug, Clone)]
struct QueryMetrics {
    first_page: Duration,
    pages: u64,
    rows_streamed: usize,
    elapsed: Duration,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;

    let metrics = match config.backend {
        Backend::Memory => {
            let service = Arc::new(InMemoryQueryService::demo(config.page_size));
            run_query_benchmark(service, &config.sql).await?
        }
        Backend::Mysql => {
            let service = Arc::new(MysqlQueryService::from_settings(&connection_settings(
                &config,
            )));
            let metrics = run_query_benchmark(Arc::clone(&service), &config.sql).await;
            service.disconnect().await.map_err(io_other)?;
            metrics?
        }
    };

    let first_page_ms = metrics.first_page.as_secs_f64() * 1_000.0;
    let rows_per_sec = rows_per_sec(&metrics);

    println!("metric.first_page_ms={first_page_ms:.3}");
    println!("metric.pages={}", metrics.pages);
    println!("metric.rows_streamed={}", metrics.rows_streamed);
    println!(
        "metric.stream_elapsed_ms={:.3}",
        metrics.elapsed.as_secs_f64() * 1_000.0
    );
    println!("metric.rows_per_sec={rows_per_sec:.3}");
    if let Some(bytes) = peak_memory_bytes_best_effort() {
        println!("metric.peak_memory_bytes={bytes}");
    } else {
        println!("metric.peak_memory_bytes=n/a");
    }

    enforce_assertions(&config, first_page_ms, rows_per_sec)?;
    Ok(())
}

fn connection_settings(config: &BenchmarkConfig) -> ConnectionSettings {
    let mut settings =
        ConnectionSettings::new("benchmark", config.host.clone(), config.user.clone());
    settings.port = config.port;
    settings.database = Some(config.database.clone());
    settings.page_size = config.page_size;
    settings
}

/// Streams `sql` to the end through a session and times the first page and
/// the whole stream.
async fn run_query_benchmark<S: RemoteQueryService + ?Sized>(
    service: Arc<S>,
    sql: &str,
) -> io::Result<QueryMetrics> {
    let mut history = HistoryStore::new(service, Some(1));
    let started_at = Instant::now();
    let session = history
        .run(sql, Some("benchmark"))
        .await
        .map_err(io_other)?;
    let first_page = started_at.elapsed();

    let mut pages = 1_u64;
    while session.has_next() {
        match session.fetch_next().await.map_err(io_other)? {
            FetchOutcome::Appended { .. } => pages += 1,
            FetchOutcome::Exhausted => break,
            outcome => {
                return Err(io_other(format!("stream stalled: {outcome:?}")));
            }
        }
    }

    Ok(QueryMetrics {
        first_page,
        pages,
        rows_streamed: session.row_count(),
        elapsed: started_at.elapsed(),
    })
}

#[allow(clippy::cast_precision_loss)]
fn rows_per_sec(metrics: &QueryMetrics) -> f64 {
    let seconds = metrics.elapsed.as_secs_f64();
    if seconds > 0.0 {
        metrics.rows_streamed as f64 / seconds
    } else {
        0.0
    }
}

fn enforce_assertions(
    config: &BenchmarkConfig,
    first_page_ms: f64,
    rows_per_sec: f64,
) -> io::Result<()> {
    if let Some(max_first_page_ms) = config.assert_first_page_ms {
        if first_page_ms > max_first_page_ms {
            return Err(io_other(format!(
                "first page latency {first_page_ms:.3}ms exceeded threshold {max_first_page_ms:.3}ms"
            )));
        }
    }

    if let Some(min_rows_per_sec) = config.assert_min_rows_per_sec {
        if rows_per_sec < min_rows_per_sec {
            return Err(io_other(format!(
                "rows/sec {rows_per_sec:.3} below threshold {min_rows_per_sec:.3}"
            )));
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/status").ok()?;
    let vm_hwm_line = contents.lines().find(|line| line.starts_with("VmHWM:"))?;
    let kb = vm_hwm_line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1_024)
}

#[cfg(not(target_os = "linux"))]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    None
}

fn parse_args() -> io::Result<BenchmarkConfig> {
    let mut config = BenchmarkConfig::default();
    let outcome = parse_args_from(std::env::args().skip(1), &mut config)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(config)
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    config: &mut BenchmarkConfig,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--backend" => {
                config.backend = match next_value(&mut args, "--backend")?.as_str() {
                    "memory" => Backend::Memory,
                    "mysql" => Backend::Mysql,
                    other => return Err(io_other(format!("unknown backend `{other}`"))),
                };
            }
            "--host" => config.host = next_value(&mut args, "--host")?,
            "--port" => config.port = parse_value(&mut args, "--port")?,
            "--user" => config.user = next_value(&mut args, "--user")?,
            "--database" => config.database = next_value(&mut args, "--database")?,
            "--sql" => config.sql = next_value(&mut args, "--sql")?,
            "--page-size" => {
                config.page_size = parse_value::<usize>(&mut args, "--page-size")?.max(1);
            }
            "--assert-first-page-ms" => {
                config.assert_first_page_ms = Some(parse_value(&mut args, "--assert-first-page-ms")?);
            }
            "--assert-min-rows-per-sec" => {
                config.assert_min_rows_per_sec =
                    Some(parse_value(&mut args, "--assert-min-rows-per-sec")?);
            }
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Config)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn parse_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    next_value(args, flag)?
        .parse::<T>()
        .map_err(|error| io_other(format!("invalid {flag} value: {error}")))
}

fn print_help() {
    println!(
        "lens benchmark runner\n\n\
Usage:\n  cargo run -p lens-app --bin benchmark -- [OPTIONS]\n\n\
Options:\n  --backend <memory|mysql>        Query service to stream from (default: memory)\n  --host <host>                   MySQL host (default: 127.0.0.1)\n  --port <port>                   MySQL port (default: 3306)\n  --user <user>                   MySQL user (default: root)\n  --database <name>               Database name (default: lens_bench)\n  --sql <query>                   Query to benchmark\n  --page-size <rows>              Rows per fetched page (default: 500)\n  --assert-first-page-ms <ms>     Fail if first-page latency exceeds threshold\n  --assert-min-rows-per-sec <rps> Fail if throughput is below threshold\n\n\
Environment:\n  LENS_DB_PASSWORD is used for authentication.\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}
