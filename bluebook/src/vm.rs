use std::path::PathBuf;

use crate::{
    Devices, Interpreter, InterpreterSettings, LoadedImage, MemorySettings, VmError, load_image,
};

#[derive(Debug, Clone, Default)]
pub struct VMCreateInfo {
    pub image: PathBuf,
    pub memory: MemorySettings,
    pub interpreter: InterpreterSettings,
}

/// Load the image and resume its active process.
pub fn boot(info: VMCreateInfo, devices: Devices) -> Result<Interpreter, VmError> {
    let LoadedImage {
        memory,
        specials,
        header,
    } = load_image(&info.image, info.memory)?;
    log::debug!(
        "saved window {}x{}",
        header.saved_window_size >> 16,
        header.saved_window_size & 0xFFFF
    );
    let mut vm = Interpreter::new(memory, specials, info.interpreter, devices);
    vm.image_path = Some(info.image);
    vm.load_initial_context()?;
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageError;

    #[test]
    fn missing_image_is_reported_as_an_image_error() {
        let info = VMCreateInfo {
            image: std::env::temp_dir().join("bluebook-no-such.image"),
            ..Default::default()
        };
        assert!(matches!(
            boot(info, Devices::headless()),
            Err(VmError::Image(ImageError::Io(_)))
        ));
    }
}
