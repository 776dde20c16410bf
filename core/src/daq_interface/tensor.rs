use ndarray::{ArrayD, ArrayViewD, IxDyn};

/// Channel buffer in one of the two backend-native representations.
///
/// Stages read through [`Tensor::view`] regardless of residency and emit host
/// arrays; the owning backend re-adopts those at every stage boundary.
#[derive(Debug, Clone)]
pub enum Tensor {
    Host(ArrayD<f64>),
    Device(DeviceTensor),
}

impl Tensor {
    pub fn from_host(array: ArrayD<f64>) -> Self {
        Tensor::Host(array)
    }

    pub fn view(&self) -> ArrayViewD<'_, f64> {
        match self {
            Tensor::Host(array) => array.view(),
            Tensor::Device(tensor) => tensor.view(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Host(array) => array.shape(),
            Tensor::Device(tensor) => tensor.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Move the buffer into host memory, downloading if device-resident.
    pub fn into_host(self) -> ArrayD<f64> {
        match self {
            Tensor::Host(array) => array,
            Tensor::Device(tensor) => tensor.download(),
        }
    }

    pub fn to_host(&self) -> ArrayD<f64> {
        match self {
            Tensor::Host(array) => array.clone(),
            Tensor::Device(tensor) => tensor.clone().download(),
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Tensor::Device(_))
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor::Host(ArrayD::zeros(IxDyn(&[0])))
    }
}

/// Device-resident channel buffer.
///
/// Storage is a contiguous standard-layout staging mirror; a real accelerator
/// driver replaces the transfer hooks in [`DeviceTensor::upload`] and
/// [`DeviceTensor::download`] with DMA copies. Device buffers must never
/// cross the pipeline boundary: the owning backend downloads every channel
/// before a collected packet is handed back to the caller.
#[derive(Debug, Clone)]
pub struct DeviceTensor {
    staged: ArrayD<f64>,
}

impl DeviceTensor {
    pub fn upload(array: ArrayD<f64>) -> Self {
        let staged = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        Self { staged }
    }

    pub fn download(self) -> ArrayD<f64> {
        self.staged
    }

    pub fn view(&self) -> ArrayViewD<'_, f64> {
        self.staged.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.staged.shape()
    }
}
