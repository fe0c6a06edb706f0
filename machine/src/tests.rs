//! Unit test runner for the custom test framework.

/// The default runner for unit tests.
pub fn test_runner(tests: &[&dyn Fn()]) {
    crate::println!("Running {} tests", tests.len());

    for (i, test) in tests.iter().enumerate() {
        crate::print!("{:>3}. ", i + 1);

        test();

        crate::println!(".... PASSED");
    }
}
