use std::panic;

use cudarc::driver::CudaDevice;

/// Name of CUDA device 0, `Ok(None)` when the driver reports no devices.
///
/// `cudarc` panics when the driver library cannot be loaded, so the query
/// runs under `catch_unwind`.
pub(crate) fn first_device_name() -> Result<Option<String>, String> {
    let outcome = panic::catch_unwind(|| -> Result<Option<String>, String> {
        let count = CudaDevice::count().map_err(|e| e.to_string())?;
        if count <= 0 {
            return Ok(None);
        }
        let device = CudaDevice::new(0).map_err(|e| e.to_string())?;
        device.name().map(Some).map_err(|e| e.to_string())
    });
    outcome.unwrap_or_else(|_| Err("CUDA driver library could not be loaded".to_string()))
}
