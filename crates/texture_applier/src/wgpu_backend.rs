use model::{BYTES_PER_PIXEL, RasterSize};
use protocol::{Snapshot, Version};

use crate::{BackendError, TextureBackend};

pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// GPU copy of one snapshot, ready to bind on the preview model.
#[derive(Debug)]
pub struct WgpuTexture {
    version: Version,
    size: RasterSize,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl WgpuTexture {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn size(&self) -> RasterSize {
        self.size
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

#[derive(Debug, Clone)]
pub struct WgpuTextureBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuTextureBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
}

impl TextureBackend for WgpuTextureBackend {
    type Resource = WgpuTexture;

    fn upload(&self, snapshot: &Snapshot) -> Result<WgpuTexture, BackendError> {
        let size = snapshot.size();
        let max = self.device.limits().max_texture_dimension_2d;
        if size.width() > max || size.height() > max {
            return Err(BackendError::TooLarge {
                width: size.width(),
                height: size.height(),
                max,
            });
        }

        let extent = wgpu::Extent3d {
            width: size.width(),
            height: size.height(),
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texture_applier.preview"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            snapshot.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width() * BYTES_PER_PIXEL as u32),
                rows_per_image: Some(size.height()),
            },
            extent,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture {
            version: snapshot.version(),
            size,
            texture,
            view,
        })
    }

    fn dispose(&self, resource: WgpuTexture) {
        resource.texture.destroy();
    }
}
