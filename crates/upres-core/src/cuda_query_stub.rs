pub(crate) fn first_device_name() -> Result<Option<String>, String> {
    Err("upres-core built without `cuda` feature".to_string())
}
