use tracing::dispatcher::{Dispatch, set_global_default};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global subscriber. `levels` is an `EnvFilter` directive;
/// `RUST_LOG`-style targets such as `kube_event_loki=debug` are accepted.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));

    let dispatch = if json {
        Dispatch::new(
            FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .with_writer(std::io::stderr)
                .finish(),
        )
    } else {
        Dispatch::new(
            FmtSubscriber::builder()
                .with_ansi(color)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish(),
        )
    };

    // Tests may initialize this more than once.
    let _ = set_global_default(dispatch);
}
