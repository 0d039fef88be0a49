// build.rs

fn main() {
    // Build timestamp surfaced on the landing page
    if let Err(e) = vergen::EmitBuilder::builder().all_build().emit() {
        println!("cargo:warning=Unable to generate build info: {e}");
    }
}
