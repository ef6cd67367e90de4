/// Logging initialization, called once at the start of `ChatSession::new()`.
///
/// Honors `RUST_LOG` when set; otherwise defaults to debug for this crate
/// and info for everything else. Safe to call repeatedly (later calls are
/// no-ops), which keeps multi-session tests quiet.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sofa_core=debug,info".into()),
        )
        .try_init();
}
