use candle_core::Device;
use tracing::info;

/// Metal when the `metal` feature is built in and a GPU answers, else CPU.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(dev) => {
                info!(device = "metal", "embedding device selected");
                return dev;
            }
            Err(err) => tracing::warn!(error = %err, "metal unavailable, using CPU"),
        }
    }
    info!(device = "cpu", "embedding device selected");
    Device::Cpu
}
