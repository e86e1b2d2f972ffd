// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words combinators scavenger

//! The promise machine: state, chaining, combinators, and the weak-reference
//! registry with its scavenger.
//!
//! # Execution Model
//!
//! Promises settle exactly once (Pending → Fulfilled | Rejected). Reactions
//! (`then` / `catch` / `finally`) never run synchronously inside the attaching
//! call - they are queued as microtasks, even when the parent is already settled,
//! preserving the tick-boundary guarantee scripts rely on.
//!
//! Values and reasons are engine-agnostic: `Arc<dyn Any + Send + Sync>`. A thin
//! scripting facade converts to and from its own value representation at the
//! boundary.
//!
//! # Ownership
//!
//! Callers hold strong [`PromiseHandle`]s; the registry holds only weak references
//! plus an id ring it sweeps round-robin, so an abandoned promise costs one dead
//! weak entry until the scavenger visits it - never a leak.

// Attach sources.
pub mod combinators;
pub mod machine;
pub mod registry;
pub mod settler;
pub mod value;

// Re-export.
pub use combinators::*;
pub use machine::*;
pub use registry::*;
pub use settler::*;
pub use value::*;
