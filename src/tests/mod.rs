mod test_backend;
mod test_builder;
mod test_power_mean;

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}
