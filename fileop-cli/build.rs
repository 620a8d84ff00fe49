use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Emit the build timestamp and target triple for the `--version` output.  Git metadata isn't
    // used because it isn't available when the crate is built from crates.io.
    EmitBuilder::builder().all_build().all_cargo().emit()?;

    Ok(())
}
