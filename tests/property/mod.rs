// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! Lifecycle properties of open requests: allowed paths only, terminal
//! states absorb every later command.

mod open_request_sequence;
