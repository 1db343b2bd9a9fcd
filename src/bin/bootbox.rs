use anyhow::Result;

fn main() -> Result<()> {
    bootbox::cli::run()
}
