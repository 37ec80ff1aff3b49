use once_cell::sync::Lazy;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

/// Routes kernel and wrapper logs through the test harness.
pub fn init_logging() {
    Lazy::force(&LOGGER);
}
