//! End-to-end runs of the harness against temporary SQLite databases.

mod harness;
mod scenarios;
