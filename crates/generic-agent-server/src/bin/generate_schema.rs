use generic_agent_server::openapi;
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let schema = openapi::generate_schema()?;

    let package_dir = env::var("CARGO_MANIFEST_DIR")?;
    let output_path = PathBuf::from(package_dir).join("openapi.json");

    fs::write(&output_path, &schema)?;
    eprintln!(
        "Successfully generated OpenAPI schema at {}",
        output_path.display()
    );

    // Output the schema to stdout for piping
    println!("{}", schema);
    Ok(())
}
