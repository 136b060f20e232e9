//! Subcommand implementations. `refenrich` has exactly one real operation —
//! running a batch — but it stays in its own module the way the teacher
//! crate's per-command handlers do.

pub mod run;
