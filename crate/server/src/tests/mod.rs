mod key_manager_tests;
mod test_utils;
