//! End-to-end tests through the database facade.
//!
//! Each test file covers one scenario against a fresh in-memory or
//! temporary-directory database.

#![cfg(test)]

mod helpers;

mod test_blobs;
mod test_concurrency;
mod test_faults;
mod test_index_maintenance;
mod test_lifecycle;
mod test_pagination;
mod test_random_ids;
mod test_range_scan;
mod test_round_trip;
