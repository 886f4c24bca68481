// End-to-end smoke coverage lives in tests/; this crate has no
// library surface of its own.
