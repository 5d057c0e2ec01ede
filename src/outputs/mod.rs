//! Run outputs on disk.
//!
//! - [`json`]: the full [`RunReport`](crate::pipeline::RunReport) for downstream tooling
//! - [`markdown`]: a readable digest per run and a `runs.md` index
//!
//! ```text
//! json_output_dir/
//! └── 2025-03-04/
//!     └── 20250304T060000Z-1c2d.json
//!
//! markdown_output_dir/
//! ├── runs.md
//! ├── newsletter-2025-03-04.md      # dry-run newsletter
//! └── 2025-03-04/
//!     └── 20250304T060000Z-1c2d.md
//! ```

pub mod json;
pub mod markdown;
