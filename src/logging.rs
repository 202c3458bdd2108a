use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn filter() -> EnvFilter {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match "wgpu=warn".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Install the fmt subscriber once; later calls are no-ops, and an already
/// installed global subscriber is left in place.
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(true)
            .with_thread_ids(false)
            .with_level(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
        tracing::info!("logging initialised twice without panicking");
    }
}
