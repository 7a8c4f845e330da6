use time::macros::format_description;
use tracing_subscriber::{EnvFilter, fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the process-wide tracing subscriber: local-time formatted,
/// line-numbered, filtered by `default_filter` unless `RUST_LOG` overrides it.
///
/// `service_name` is used only as the default filter's own-crate target, e.g.
/// `init_tracing("instance_manager_api")` enables debug logs for
/// `instance_manager_api=debug,shared=debug` and warns everything else down.
pub fn init_tracing(service_name: &str) {
    let default_directive = format!(
        "{service_name}=debug,shared=debug,queue_core=debug,lock_core=debug,worker_registry=debug,tower_http=warn,hyper=warn"
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(timer),
        )
        .init();
}

/// Loads `.env` if present; a missing file is not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::info!("loaded .env file from {}", path.display()),
        Err(dotenvy::Error::Io(ref err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("couldn't load .env file: {e}"),
    }
}
