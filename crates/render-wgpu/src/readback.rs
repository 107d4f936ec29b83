use std::sync::mpsc;

use stagehand_render::BackendError;

/// A texel region to copy back to the CPU.
pub(crate) struct Region<'a> {
    pub texture: &'a wgpu::Texture,
    pub aspect: wgpu::TextureAspect,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub bytes_per_texel: u32,
}

/// Copy `region` into a staging buffer, map it and return the tightly
/// packed rows. Blocks until the device is idle.
pub(crate) fn read_region(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    region: Region<'_>,
) -> Result<Vec<u8>, BackendError> {
    let row_bytes = region.width * region.bytes_per_texel;
    let padded = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: u64::from(padded) * u64::from(region.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: region.texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: region.x,
                y: region.y,
                z: 0,
            },
            aspect: region.aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(region.height),
            },
        },
        wgpu::Extent3d {
            width: region.width,
            height: region.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| BackendError::Readback(e.to_string()))?
        .map_err(|e| BackendError::Readback(e.to_string()))?;

    let mut out = Vec::with_capacity((row_bytes * region.height) as usize);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks(padded as usize).take(region.height as usize) {
            out.extend_from_slice(&row[..row_bytes as usize]);
        }
    }
    staging.unmap();
    Ok(out)
}

/// IEEE 754 binary16 to f32.
pub(crate) fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f32::from(bits & 0x3ff);
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}
