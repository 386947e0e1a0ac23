//! Integration test suite

mod crawl_tests;
mod fetcher_tests;
