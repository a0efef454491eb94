use anyhow::Result;

fn main() -> Result<()> {
    luabox::cli::run()
}
