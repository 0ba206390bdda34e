// =============================================================================
// kdispatch — Kernel Utilities
// =============================================================================
//
// Shared utilities used across the dispatch subsystem.
//
//   fail.rs — the fatal failure path and its abort hook
//   list.rs — arena-backed doubly linked list with generation-checked links
// =============================================================================

pub mod fail;
pub mod list;
