// 2D textures loaded from image files
//
// Decoding is delegated to an `ImageDecoder` so the resource code does not
// depend on any particular image library; `ImageCrateDecoder` is the default.

use std::fmt;
use std::path::Path;

use super::device::{create_object, DeviceRef, Handle, TextureParameter};
use crate::error::{Error, Result};

/// Pixel format of the uploaded texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8 bits per channel, 3 channels
    Rgb,
}

impl TextureFormat {
    pub fn channels(self) -> u8 {
        match self {
            Self::Rgb => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureWrap {
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

/// How samples are taken between mip levels. `None` disables mipmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipmapFilter {
    None,
    Nearest,
    Linear,
}

/// Sampling state applied when a texture is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureOptions {
    pub wrap_u: TextureWrap,
    pub wrap_v: TextureWrap,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub mipmap_filter: MipmapFilter,
}

impl TextureOptions {
    /// Same wrap on both axes, same filter for min and mag, no mipmaps
    pub fn uniform(wrap: TextureWrap, filter: TextureFilter) -> Self {
        Self {
            wrap_u: wrap,
            wrap_v: wrap,
            min_filter: filter,
            mag_filter: filter,
            mipmap_filter: MipmapFilter::None,
        }
    }
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self::uniform(TextureWrap::Repeat, TextureFilter::Linear)
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// Row-major pixels, 8 bits per channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

/// Turns an image file into raw pixels
pub trait ImageDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage>;
}

impl<F> ImageDecoder for F
where
    F: Fn(&Path) -> Result<DecodedImage>,
{
    fn decode(&self, path: &Path) -> Result<DecodedImage> {
        self(path)
    }
}

/// Decoder backed by the `image` crate. Keeps the file's own channel count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage> {
        let image = image::open(path).map_err(|e| Error::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let channels = image.color().channel_count();
        let (width, height) = (image.width(), image.height());
        let pixels = match channels {
            1 => image.into_luma8().into_raw(),
            2 => image.into_luma_alpha8().into_raw(),
            3 => image.into_rgb8().into_raw(),
            _ => image.into_rgba8().into_raw(),
        };
        Ok(DecodedImage {
            width,
            height,
            channels,
            pixels,
        })
    }
}

// =============================================================================
// TEXTURE
// =============================================================================

pub struct Texture2D {
    device: DeviceRef,
    handle: Handle,
    width: u32,
    height: u32,
    channels: u8,
}

impl Texture2D {
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            handle: 0,
            width: 0,
            height: 0,
            channels: 0,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Load `path` with one wrap mode for both axes and one filter for
    /// minification and magnification. No mipmaps.
    pub fn init(
        &mut self,
        decoder: &dyn ImageDecoder,
        path: impl AsRef<Path>,
        format: TextureFormat,
        wrap: TextureWrap,
        filter: TextureFilter,
    ) -> Result<()> {
        self.init_with_options(decoder, path, format, &TextureOptions::uniform(wrap, filter))
    }

    /// Load `path` and apply `options`. Mipmaps are generated unless the
    /// mipmap filter is `None`.
    ///
    /// The image's channel count is checked before any texture object is
    /// allocated.
    pub fn init_with_options(
        &mut self,
        decoder: &dyn ImageDecoder,
        path: impl AsRef<Path>,
        format: TextureFormat,
        options: &TextureOptions,
    ) -> Result<()> {
        let image = decoder.decode(path.as_ref())?;
        if image.channels != format.channels() {
            return Err(Error::UnsupportedChannels(image.channels));
        }
        let expected = (image.width as usize)
            .checked_mul(image.height as usize)
            .and_then(|texels| texels.checked_mul(image.channels as usize))
            .unwrap_or(usize::MAX);
        if image.pixels.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: image.pixels.len(),
            });
        }

        self.free_mem();
        self.handle = create_object(&*self.device, "texture", |d| d.create_texture())?;
        self.width = image.width;
        self.height = image.height;
        self.channels = image.channels;

        checked!(self.device, bind_texture_2d(self.handle));
        let parameters = [
            TextureParameter::WrapS(options.wrap_u),
            TextureParameter::WrapT(options.wrap_v),
            TextureParameter::MinFilter(options.min_filter, options.mipmap_filter),
            TextureParameter::MagFilter(options.mag_filter),
        ];
        for parameter in parameters {
            checked!(self.device, tex_parameter_2d(parameter));
        }
        checked!(
            self.device,
            tex_image_2d(format, image.width, image.height, &image.pixels)
        );
        if options.mipmap_filter != MipmapFilter::None {
            checked!(self.device, generate_mipmap_2d());
        }
        Ok(())
    }

    /// Bind to sampler unit `unit`
    pub fn bind(&self, unit: u32) -> Result<()> {
        checked!(self.device, active_texture(unit));
        checked!(self.device, bind_texture_2d(self.handle));
        Ok(())
    }

    pub fn free_mem(&mut self) {
        if self.handle != 0 {
            self.device.delete_texture(self.handle);
            log::trace!("Released texture {}", self.handle);
            self.handle = 0;
            self.width = 0;
            self.height = 0;
            self.channels = 0;
        }
    }
}

impl Drop for Texture2D {
    fn drop(&mut self) {
        self.free_mem();
    }
}

impl fmt::Debug for Texture2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture2D")
            .field("handle", &self.handle)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::soft::SoftDevice;

    fn solid(channels: u8) -> impl Fn(&Path) -> Result<DecodedImage> {
        move |_: &Path| {
            Ok(DecodedImage {
                width: 2,
                height: 2,
                channels,
                pixels: vec![7; 4 * channels as usize],
            })
        }
    }

    #[test]
    fn basic_init_uses_one_wrap_and_filter() {
        let soft = SoftDevice::new();
        let mut texture = Texture2D::new(soft.clone());
        texture
            .init(&solid(3), "checker.png", TextureFormat::Rgb, TextureWrap::Clamp, TextureFilter::Nearest)
            .unwrap();

        let state = soft.texture(texture.handle()).unwrap();
        assert_eq!((state.width, state.height), (2, 2));
        assert_eq!(state.wrap_s, TextureWrap::Clamp);
        assert_eq!(state.wrap_t, TextureWrap::Clamp);
        assert_eq!(state.min_filter, (TextureFilter::Nearest, MipmapFilter::None));
        assert_eq!(state.mag_filter, TextureFilter::Nearest);
        assert!(!state.mipmapped);
        assert_eq!(state.pixels, vec![7; 12]);
    }

    #[test]
    fn mipmap_filter_generates_levels() {
        let soft = SoftDevice::new();
        let mut texture = Texture2D::new(soft.clone());
        let options = TextureOptions {
            wrap_u: TextureWrap::Repeat,
            wrap_v: TextureWrap::Clamp,
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Nearest,
            mipmap_filter: MipmapFilter::Linear,
        };
        texture
            .init_with_options(&solid(3), "a.png", TextureFormat::Rgb, &options)
            .unwrap();

        let state = soft.texture(texture.handle()).unwrap();
        assert_eq!(state.min_filter, (TextureFilter::Linear, MipmapFilter::Linear));
        assert_eq!(state.wrap_t, TextureWrap::Clamp);
        assert!(state.mipmapped);
    }

    #[test]
    fn channel_gate_allocates_nothing() {
        let soft = SoftDevice::new();
        let mut texture = Texture2D::new(soft.clone());
        let err = texture
            .init(&solid(4), "rgba.png", TextureFormat::Rgb, TextureWrap::Repeat, TextureFilter::Linear)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedChannels(4)));
        assert!(err.to_string().contains('4'));
        assert_eq!(texture.handle(), 0);
        assert_eq!(soft.live_objects(), 0);
    }

    #[test]
    fn short_pixel_data_allocates_nothing() {
        let soft = SoftDevice::new();
        let mut texture = Texture2D::new(soft.clone());
        let short = |_: &Path| -> Result<DecodedImage> {
            Ok(DecodedImage {
                width: 64,
                height: 64,
                channels: 3,
                pixels: vec![0; 3],
            })
        };
        let err = texture
            .init(&short, "short.png", TextureFormat::Rgb, TextureWrap::Repeat, TextureFilter::Linear)
            .unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 12288, actual: 3 }));
        assert_eq!(texture.handle(), 0);
        assert_eq!(soft.live_objects(), 0);
    }

    #[test]
    fn bind_selects_unit() {
        let soft = SoftDevice::new();
        let mut texture = Texture2D::new(soft.clone());
        texture
            .init_with_options(&solid(3), "a.png", TextureFormat::Rgb, &TextureOptions::default())
            .unwrap();
        texture.bind(5).unwrap();
        assert_eq!(soft.texture_unit(5), texture.handle());
    }

    #[test]
    fn free_mem_resets_handle() {
        let soft = SoftDevice::new();
        let mut texture = Texture2D::new(soft.clone());
        texture.free_mem();
        texture
            .init_with_options(&solid(3), "a.png", TextureFormat::Rgb, &TextureOptions::default())
            .unwrap();
        texture.free_mem();
        texture.free_mem();
        assert_eq!(texture.handle(), 0);
        assert_eq!((texture.width(), texture.height(), texture.channels()), (0, 0, 0));
        assert_eq!(soft.live_objects(), 0);
    }

    #[test]
    fn image_crate_reports_missing_file() {
        let err = ImageCrateDecoder
            .decode(Path::new("/nonexistent/glresource.png"))
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
