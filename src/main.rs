//! Strobe CLI entry point.

use strobe_lib::cli::{self, Cli};
use strobe_lib::core::Result;

// Ingest is allocation-heavy on the batch path; mimalloc keeps it cheap.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
