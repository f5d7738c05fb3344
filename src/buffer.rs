//! The image buffer: a strongly-shaped float array with host/device
//! residency tracking and lazy synchronization.

use ocl::{Image, Queue};
use ocl::enums::{ImageChannelDataType, ImageChannelOrder, MemObjectType};

use crate::dims::Dims;
use crate::error::{Error, Result};

/// Which side of the host/device divide currently holds valid data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Freshly issued; neither side has been written.
    Empty,
    /// The host allocation is current; the device object may be stale or
    /// unallocated.
    HostValid,
    /// The device object is current; the host allocation may be stale or
    /// unallocated.
    DeviceValid,
    /// Both sides agree. Holds only between a completed transfer and the
    /// next write on either side.
    BothValid,
}

/// Sample depth of the data most recently loaded into the host allocation.
///
/// Integer depths mark data that still needs a [`Buffer::reinterpret`]
/// pass before it can be treated as floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    U8,
    U16,
    F32,
}

impl Depth {
    /// Width of one sample in bytes.
    pub fn sample_size(&self) -> usize {
        match *self {
            Depth::U8 => 1,
            Depth::U16 => 2,
            Depth::F32 => 4,
        }
    }
}

/// The device-side representation, created on demand.
#[derive(Debug)]
enum DeviceMemory {
    None,
    Buffer(ocl::Buffer<f32>),
    Image(Image<f32>),
}

impl DeviceMemory {
    fn is_none(&self) -> bool {
        matches!(*self, DeviceMemory::None)
    }
}

const CL_MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
const CL_OUT_OF_RESOURCES: i32 = -5;
const CL_OUT_OF_HOST_MEMORY: i32 = -6;

fn map_alloc_err(err: ocl::Error) -> Error {
    match Error::from(err) {
        Error::Cl(CL_MEM_OBJECT_ALLOCATION_FAILURE)
        | Error::Cl(CL_OUT_OF_RESOURCES)
        | Error::Cl(CL_OUT_OF_HOST_MEMORY) => Error::OutOfMemory,
        other => other,
    }
}

/// A handle to a rectangular array of 32-bit floats with up to three
/// dimensions.
///
/// The host and device copies are synchronized lazily: reading one side
/// while only the other is valid triggers a single blocking transfer over
/// the buffer's associated command queue. Exactly one task holds a buffer
/// at any time; idle buffers live in the resource manager's pool.
///
/// Tasks should not create buffers directly; use
/// [`ResourceManager::request_buffer`](crate::ResourceManager::request_buffer)
/// so the handle can be returned to the pool afterwards.
#[derive(Debug)]
pub struct Buffer {
    dims: Dims,
    host: Option<Vec<f32>>,
    device: DeviceMemory,
    residency: Residency,
    queue: Option<Queue>,
    origin: Option<usize>,
    seq: Vec<u64>,
    depth: Depth,
    poison: Option<i32>,
}

impl Buffer {
    pub fn new<D: Into<Dims>>(dims: D) -> Buffer {
        Buffer {
            dims: dims.into(),
            host: None,
            device: DeviceMemory::None,
            residency: Residency::Empty,
            queue: None,
            origin: None,
            seq: Vec::new(),
            depth: Depth::F32,
            poison: None,
        }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// The shape a downstream task must request to mirror this buffer.
    pub fn requisition(&self) -> Dims {
        self.dims
    }

    /// Number of float elements.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Capacity in bytes (`product(dims) * 4`).
    pub fn byte_size(&self) -> usize {
        self.dims.byte_size()
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn set_depth(&mut self, depth: Depth) {
        self.depth = depth;
    }

    /// Position of this buffer in its current stream, stamped by fan-out
    /// copiers. Nested fan-outs stack their numbering; `seq` reports the
    /// innermost level.
    pub fn seq(&self) -> Option<u64> {
        self.seq.last().copied()
    }

    /// Enters one fan-out level: records the buffer's position on entry.
    pub fn push_seq(&mut self, seq: u64) {
        self.seq.push(seq);
    }

    /// Leaves one fan-out level (called by the collector once order is
    /// restored).
    pub fn pop_seq(&mut self) -> Option<u64> {
        self.seq.pop()
    }

    /// Carries stream metadata from an input buffer onto this one.
    pub fn inherit_metadata(&mut self, from: &Buffer) {
        self.seq.clear();
        self.seq.extend_from_slice(&from.seq);
    }

    pub(crate) fn origin(&self) -> Option<usize> {
        self.origin
    }

    pub(crate) fn set_origin(&mut self, origin: Option<usize>) {
        self.origin = origin;
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poison.is_some()
    }

    fn check(&self) -> Result<()> {
        match self.poison {
            Some(code) => Err(Error::Cl(code)),
            None => Ok(()),
        }
    }

    fn poison_from(&mut self, err: ocl::Error) -> Error {
        let err = Error::from(err);
        if let Error::Cl(code) = err {
            self.poison = Some(code);
        }
        err
    }

    fn host_alloc(&mut self) -> &mut Vec<f32> {
        let len = self.dims.len();
        self.host.get_or_insert_with(|| vec![0.0; len])
    }

    fn transfer_queue(&self) -> Result<Queue> {
        self.queue
            .clone()
            .ok_or_else(|| Error::Ocl("buffer has no associated command queue".into()))
    }

    /// Returns the host array for reading, downloading from the device
    /// first if that side alone is valid.
    pub fn host_data(&mut self) -> Result<&[f32]> {
        self.sync_to_host()?;
        Ok(self.host.as_deref().unwrap())
    }

    /// Returns the host array for writing. Any device copy becomes stale.
    pub fn host_data_mut(&mut self) -> Result<&mut [f32]> {
        self.sync_to_host()?;
        self.residency = Residency::HostValid;
        Ok(self.host.as_deref_mut().unwrap())
    }

    fn sync_to_host(&mut self) -> Result<()> {
        self.check()?;
        match self.residency {
            Residency::HostValid | Residency::BothValid => {}
            Residency::Empty => {
                self.host_alloc();
                self.residency = Residency::HostValid;
            }
            Residency::DeviceValid => {
                let queue = self.transfer_queue()?;
                self.host_alloc();
                let host = self.host.as_deref_mut().unwrap();
                let res = match self.device {
                    DeviceMemory::Buffer(ref mem) => mem.read(&mut *host).queue(&queue).enq(),
                    DeviceMemory::Image(ref img) => img.read(&mut *host).queue(&queue).enq(),
                    DeviceMemory::None => {
                        return Err(Error::Ocl(
                            "residency says device-valid but no device object exists".into(),
                        ))
                    }
                };
                res.map_err(|e| self.poison_from(e))?;
                self.residency = Residency::BothValid;
            }
        }
        Ok(())
    }

    /// Returns the device memory object for kernel reads, uploading the
    /// host array first if that side alone is valid.
    pub fn device_data(&mut self, queue: &Queue) -> Result<&ocl::Buffer<f32>> {
        self.sync_to_device(queue)?;
        match self.device {
            DeviceMemory::Buffer(ref mem) => Ok(mem),
            _ => unreachable!("sync_to_device installs a buffer object"),
        }
    }

    /// Returns the device memory object as a kernel output argument. The
    /// host copy becomes stale.
    pub fn device_data_mut(&mut self, queue: &Queue) -> Result<&ocl::Buffer<f32>> {
        self.sync_to_device(queue)?;
        self.residency = Residency::DeviceValid;
        match self.device {
            DeviceMemory::Buffer(ref mem) => Ok(mem),
            _ => unreachable!("sync_to_device installs a buffer object"),
        }
    }

    fn sync_to_device(&mut self, queue: &Queue) -> Result<()> {
        self.check()?;
        self.queue = Some(queue.clone());

        // An image view cannot serve as a plain buffer argument; route the
        // current contents through the host before switching representations.
        if matches!(self.device, DeviceMemory::Image(..)) {
            self.sync_to_host()?;
            self.device = DeviceMemory::None;
            if self.residency == Residency::BothValid {
                self.residency = Residency::HostValid;
            }
        }

        if self.device.is_none() {
            let mem = ocl::Buffer::<f32>::builder()
                .queue(queue.clone())
                .len(self.dims.len())
                .build()
                .map_err(map_alloc_err)?;
            self.device = DeviceMemory::Buffer(mem);
        }

        match self.residency {
            Residency::DeviceValid | Residency::BothValid => {}
            Residency::Empty => {
                self.residency = Residency::DeviceValid;
            }
            Residency::HostValid => {
                let host = self.host.as_deref().unwrap();
                let res = match self.device {
                    DeviceMemory::Buffer(ref mem) => mem.write(host).queue(queue).enq(),
                    _ => unreachable!(),
                };
                res.map_err(|e| self.poison_from(e))?;
                self.residency = Residency::BothValid;
            }
        }
        Ok(())
    }

    /// Returns the contents bound as a 2-D image object for kernels that
    /// sample rather than index.
    pub fn device_image(&mut self, queue: &Queue) -> Result<&Image<f32>> {
        self.sync_to_image(queue)?;
        match self.device {
            DeviceMemory::Image(ref img) => Ok(img),
            _ => unreachable!("sync_to_image installs an image object"),
        }
    }

    /// Image view as a kernel output argument. The host copy becomes stale.
    pub fn device_image_mut(&mut self, queue: &Queue) -> Result<&Image<f32>> {
        self.sync_to_image(queue)?;
        self.residency = Residency::DeviceValid;
        match self.device {
            DeviceMemory::Image(ref img) => Ok(img),
            _ => unreachable!("sync_to_image installs an image object"),
        }
    }

    fn sync_to_image(&mut self, queue: &Queue) -> Result<()> {
        self.check()?;
        if self.dims.dim_count() != 2 {
            return Err(Error::Unsupported("image views require a 2-d buffer"));
        }
        self.queue = Some(queue.clone());

        if matches!(self.device, DeviceMemory::Buffer(..)) {
            self.sync_to_host()?;
            self.device = DeviceMemory::None;
            if self.residency == Residency::BothValid {
                self.residency = Residency::HostValid;
            }
        }

        if self.device.is_none() {
            let [w, h, _] = self.dims.to_lens();
            let img = Image::<f32>::builder()
                .queue(queue.clone())
                .channel_order(ImageChannelOrder::R)
                .channel_data_type(ImageChannelDataType::Float)
                .image_type(MemObjectType::Image2d)
                .dims((w, h))
                .build()
                .map_err(map_alloc_err)?;
            self.device = DeviceMemory::Image(img);
        }

        match self.residency {
            Residency::DeviceValid | Residency::BothValid => {}
            Residency::Empty => {
                self.residency = Residency::DeviceValid;
            }
            Residency::HostValid => {
                let host = self.host.as_deref().unwrap();
                let res = match self.device {
                    DeviceMemory::Image(ref img) => img.write(host).queue(queue).enq(),
                    _ => unreachable!(),
                };
                res.map_err(|e| self.poison_from(e))?;
                self.residency = Residency::BothValid;
            }
        }
        Ok(())
    }

    /// Fills the buffer from a float slice.
    pub fn set_host_data(&mut self, data: &[f32]) -> Result<()> {
        self.check()?;
        let requested = data.len() * std::mem::size_of::<f32>();
        if requested > self.byte_size() {
            return Err(Error::WrongSize {
                requested,
                capacity: self.byte_size(),
            });
        }
        self.host_alloc()[..data.len()].copy_from_slice(data);
        self.residency = Residency::HostValid;
        self.depth = Depth::F32;
        Ok(())
    }

    /// Loads raw 8-bit samples into the head of the host allocation and
    /// tags the buffer accordingly. Call [`reinterpret`](Self::reinterpret)
    /// to widen them into floats.
    pub fn set_host_data_u8(&mut self, data: &[u8]) -> Result<()> {
        self.check()?;
        if data.len() > self.byte_size() {
            return Err(Error::WrongSize {
                requested: data.len(),
                capacity: self.byte_size(),
            });
        }
        let dst = self.host_alloc().as_mut_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        self.residency = Residency::HostValid;
        self.depth = Depth::U8;
        Ok(())
    }

    /// Loads raw 16-bit samples; see [`set_host_data_u8`](Self::set_host_data_u8).
    pub fn set_host_data_u16(&mut self, data: &[u16]) -> Result<()> {
        self.check()?;
        let requested = data.len() * 2;
        if requested > self.byte_size() {
            return Err(Error::WrongSize {
                requested,
                capacity: self.byte_size(),
            });
        }
        let dst = self.host_alloc().as_mut_ptr() as *mut u16;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        self.residency = Residency::HostValid;
        self.depth = Depth::U16;
        Ok(())
    }

    /// Widens `n` narrow integer samples in the host allocation into 32-bit
    /// floats in place, optionally normalizing into `[0, 1]`.
    ///
    /// Runs back to front so no second allocation is needed; a source
    /// element is at most half as wide as the 32-bit slot it expands into.
    pub fn reinterpret(&mut self, depth: Depth, n: usize, normalize: bool) -> Result<()> {
        self.check()?;
        if self.residency != Residency::HostValid && self.residency != Residency::BothValid {
            return Err(Error::Unsupported("reinterpret requires host-valid data"));
        }
        if n > self.len() {
            return Err(Error::WrongSize {
                requested: n * depth.sample_size(),
                capacity: self.byte_size(),
            });
        }
        let dst = self.host.as_mut().unwrap().as_mut_ptr();
        match depth {
            Depth::U8 => {
                let scale = if normalize { 255.0 } else { 1.0 };
                for i in (0..n).rev() {
                    let sample = unsafe { *(dst as *const u8).add(i) };
                    unsafe { *dst.add(i) = f32::from(sample) / scale };
                }
            }
            Depth::U16 => {
                let scale = if normalize { 65535.0 } else { 1.0 };
                for i in (0..n).rev() {
                    let sample = unsafe { *(dst as *const u16).add(i) };
                    unsafe { *dst.add(i) = f32::from(sample) / scale };
                }
            }
            Depth::F32 => {}
        }
        self.depth = Depth::F32;
        self.residency = Residency::HostValid;
        Ok(())
    }

    /// Copies this buffer's contents into `dst`, which must have the same
    /// shape. Prefers a device-side copy when both handles live on a device.
    pub fn copy_into(&mut self, dst: &mut Buffer) -> Result<()> {
        self.check()?;
        dst.check()?;
        if dst.dims != self.dims {
            return Err(Error::WrongSize {
                requested: self.byte_size(),
                capacity: dst.byte_size(),
            });
        }

        let device_src = matches!(
            (self.residency, &self.device),
            (Residency::DeviceValid, DeviceMemory::Buffer(..))
                | (Residency::BothValid, DeviceMemory::Buffer(..))
        );

        if device_src {
            if let Some(queue) = self.queue.clone() {
                let dst_mem = dst.device_data_mut(&queue)?;
                let res = match self.device {
                    DeviceMemory::Buffer(ref src_mem) => {
                        src_mem.cmd().queue(&queue).copy(dst_mem, None, None).enq()
                    }
                    _ => unreachable!(),
                };
                res.map_err(|e| self.poison_from(e))?;
                dst.residency = Residency::DeviceValid;
                dst.depth = self.depth;
                dst.seq.clone_from(&self.seq);
                return Ok(());
            }
        }

        let data: Vec<f32> = self.host_data()?.to_vec();
        dst.host_alloc().copy_from_slice(&data);
        dst.residency = Residency::HostValid;
        dst.depth = self.depth;
        dst.seq.clone_from(&self.seq);
        Ok(())
    }

    /// Resets per-checkout state when a buffer is re-issued from the pool.
    pub(crate) fn reset_for_reuse(&mut self) {
        self.seq.clear();
        self.depth = Depth::F32;
    }
}
