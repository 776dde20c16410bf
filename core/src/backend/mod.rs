use crate::daq_interface::{DataPacket, DeviceTensor, Tensor};

/// Execution backend selector; tags match the persisted configuration format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Host,
    Device,
}

impl BackendKind {
    pub fn config_tag(self) -> &'static str {
        match self {
            BackendKind::Host => "ProcessorCPU",
            BackendKind::Device => "ProcessorGPU",
        }
    }
}

/// Converts channel buffers to and from a backend's native representation at
/// pipeline boundaries. The identical pipeline logic runs against either
/// backend; only the adapter differs.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Move a buffer into this backend's native representation.
    fn adopt(&self, tensor: Tensor) -> Tensor;

    /// Copy a buffer back into host memory.
    fn release(&self, tensor: Tensor) -> Tensor {
        Tensor::from_host(tensor.into_host())
    }

    /// Adopt every channel of a packet. Called at push time and after each
    /// stage, so host arrays emitted mid-pipeline mix transparently with
    /// already-native data.
    fn ingest_packet(&self, packet: &mut DataPacket) {
        for channel in &mut packet.channels {
            let tensor = std::mem::take(&mut channel.data);
            channel.data = self.adopt(tensor);
        }
    }

    /// Ensure every channel is host-resident before the packet crosses the
    /// pipeline boundary.
    fn drain_packet(&self, packet: &mut DataPacket) {
        for channel in &mut packet.channels {
            let tensor = std::mem::take(&mut channel.data);
            channel.data = self.release(tensor);
        }
    }
}

/// Host-memory backend: the native representation is the host array itself.
pub struct HostBackend;

impl Backend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn adopt(&self, tensor: Tensor) -> Tensor {
        match tensor {
            Tensor::Host(array) => Tensor::Host(array),
            Tensor::Device(device) => Tensor::Host(device.download()),
        }
    }
}

/// Device-memory backend: host arrays are uploaded at every boundary and
/// device buffers never leave the pipeline.
pub struct DeviceBackend;

impl Backend for DeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn adopt(&self, tensor: Tensor) -> Tensor {
        match tensor {
            Tensor::Host(array) => Tensor::Device(DeviceTensor::upload(array)),
            Tensor::Device(device) => Tensor::Device(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq_interface::{AXIS_REPETITION, AXIS_SAMPLE};
    use ndarray::Array2;

    fn packet() -> DataPacket {
        let data = Array2::from_elem((2, 4), 1.0).into_dyn();
        DataPacket::from_arrays(
            &[AXIS_REPETITION, AXIS_SAMPLE],
            vec![("ch0".into(), data)],
            vec![1e9],
        )
        .unwrap()
    }

    #[test]
    fn device_backend_adopts_and_drains() {
        let backend = DeviceBackend;
        let mut p = packet();
        backend.ingest_packet(&mut p);
        assert!(p.channels[0].data.is_device());
        backend.drain_packet(&mut p);
        assert!(!p.channels[0].data.is_device());
    }

    #[test]
    fn host_backend_normalizes_device_buffers() {
        let mut p = packet();
        DeviceBackend.ingest_packet(&mut p);
        HostBackend.ingest_packet(&mut p);
        assert!(!p.channels[0].data.is_device());
    }

    #[test]
    fn config_tags_follow_the_wire_format() {
        assert_eq!(BackendKind::Host.config_tag(), "ProcessorCPU");
        assert_eq!(BackendKind::Device.config_tag(), "ProcessorGPU");
    }
}
