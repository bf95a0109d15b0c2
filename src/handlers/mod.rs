// Route handlers, grouped by resource:
//   /api/cases/*       case reads and workflow writes
//   /api/allocation/*  queues and batch assignment
//   /api/mailing/*     mailing batch checks
//   /api/users/*       user lookups
pub mod allocation;
pub mod cases;
pub mod mailing;
pub mod users;
pub mod utils;
