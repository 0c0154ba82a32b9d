//! Optional `tracing` subscriber wiring.
//!
//! The fabric itself never installs a global subscriber — per `§1`'s
//! external-launcher boundary, that decision belongs to whatever embeds
//! this crate. `init_tracing` is offered for tests, benches, and any future
//! launcher that wants the fabric's `trace!`/`debug!`/`warn!` events on
//! stderr without writing their own `tracing-subscriber` setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a process-global `fmt` subscriber filtered by `RUST_LOG` (or
/// `EnvFilter`'s default if unset). Safe to call more than once — later
/// calls are a no-op, since a global subscriber can only be set once.
pub fn init_tracing() {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
