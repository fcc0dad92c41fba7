// The custom build script, needed for the build information in `built_info`.

fn main() -> Result<(), anyhow::Error> {
    built::write_built_file()?;
    Ok(())
}
