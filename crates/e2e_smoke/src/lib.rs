//! Loopback end-to-end tests for the equipment service live under `tests/`.
