fn main() -> shadow_rs::SdResult<()> {
    // Build metadata logged by the operator at startup.
    shadow_rs::ShadowBuilder::builder().build()?;
    Ok(())
}
