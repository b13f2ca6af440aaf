//! End-to-end tests driving the HTTP API over the in-memory backend.

mod helpers;

mod filter_test;
mod ordering_test;
mod poll_test;
mod stream_test;
