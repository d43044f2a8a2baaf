use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no {0} device available")]
    NoDefault(&'static str),
    #[error("{kind} device '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("cannot enumerate {kind} devices: {message}")]
    Enumerate { kind: &'static str, message: String },
}

fn get_host() -> cpal::Host {
    cpal::default_host()
}

// Looks up the named device, or falls back to the host's default when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> Result<Device, DeviceError> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host.default_input_device().ok_or(DeviceError::NoDefault("input"));
    };
    let mut devices = host.input_devices().map_err(|e| DeviceError::Enumerate {
        kind: "input",
        message: e.to_string(),
    })?;
    devices
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| DeviceError::NotFound {
            kind: "input",
            name: target.to_string(),
        })
}

// Same lookup for playback devices.
pub fn get_or_default_output(device_name: Option<&str>) -> Result<Device, DeviceError> {
    let host = get_host();

    let Some(target) = device_name else {
        return host.default_output_device().ok_or(DeviceError::NoDefault("output"));
    };
    let mut devices = host.output_devices().map_err(|e| DeviceError::Enumerate {
        kind: "output",
        message: e.to_string(),
    })?;
    devices
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| DeviceError::NotFound {
            kind: "output",
            name: target.to_string(),
        })
}

/// One line per input device, e.g. ` * MacBook Pro Microphone(1ch, 48000hz) [default]`.
pub fn get_available_inputs() -> Result<Vec<String>, DeviceError> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host.input_devices().map_err(|e| DeviceError::Enumerate {
        kind: "input",
        message: e.to_string(),
    })?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(describe(&name, config.channels(), config.sample_rate().0, &default_name))
        })
        .collect())
}

pub fn get_available_outputs() -> Result<Vec<String>, DeviceError> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host.output_devices().map_err(|e| DeviceError::Enumerate {
        kind: "output",
        message: e.to_string(),
    })?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_output_config().ok()?;
            Some(describe(&name, config.channels(), config.sample_rate().0, &default_name))
        })
        .collect())
}

fn describe(name: &str, channels: u16, sample_rate: u32, default_name: &Option<String>) -> String {
    let mut line = format!(" * {name}({channels}ch, {sample_rate}hz)");
    if default_name.as_deref() == Some(name) {
        line.push_str(" [default]");
    }
    line
}
