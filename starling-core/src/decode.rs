//! Validation and decoding of raw cover art bytes.
//!
//! Embedded artwork is frequently malformed, so decoding runs through an ordered chain of
//! independent strategies and keeps the first one that produces a non-empty image.

use std::{io::Cursor, sync::Arc};

use image::{DynamicImage, ImageDecoder as _, ImageFormat, ImageReader, RgbaImage, imageops};

/// Anything shorter than this can't be a real cover and isn't worth a decode attempt.
pub const MIN_IMAGE_BYTES: usize = 100;

/// The image containers we recognise by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSignature {
    Jpeg,
    Png,
    Gif,
    Bmp,
}
impl ImageSignature {
    const MAGIC: [(ImageSignature, &'static [u8]); 4] = [
        (ImageSignature::Jpeg, &[0xFF, 0xD8, 0xFF]),
        (
            ImageSignature::Png,
            &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
        ),
        (ImageSignature::Gif, b"GIF"),
        (ImageSignature::Bmp, b"BM"),
    ];

    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        Self::MAGIC
            .iter()
            .find(|(_, magic)| bytes.starts_with(magic))
            .map(|(signature, _)| *signature)
    }

    pub fn format(self) -> ImageFormat {
        match self {
            ImageSignature::Jpeg => ImageFormat::Jpeg,
            ImageSignature::Png => ImageFormat::Png,
            ImageSignature::Gif => ImageFormat::Gif,
            ImageSignature::Bmp => ImageFormat::Bmp,
        }
    }
}

/// Bytes that passed [`validate`]. The decode stage only accepts these.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedBytes<'a> {
    bytes: &'a [u8],
    signature: ImageSignature,
}
impl<'a> ValidatedBytes<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn signature(&self) -> ImageSignature {
        self.signature
    }
}

/// Checks length and magic bytes before any decoding happens.
pub fn validate(bytes: &[u8]) -> Option<ValidatedBytes<'_>> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return None;
    }
    ImageSignature::sniff(bytes).map(|signature| ValidatedBytes { bytes, signature })
}

/// A decoded, immutable RGBA bitmap. Cloning is cheap and the pixels may be read from any thread.
#[derive(Clone)]
pub struct DecodedImage(Arc<RgbaImage>);
impl DecodedImage {
    /// Wraps `image` if it has a non-zero size.
    pub fn new(image: RgbaImage) -> Option<Self> {
        (image.width() > 0 && image.height() > 0).then(|| Self(Arc::new(image)))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.0
    }

    /// Whether both handles share the same pixel buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodedImage({}x{})", self.width(), self.height())
    }
}

/// One way of turning bytes into pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Guess the format from content and downscale to the requested width. The downscale
    /// happens after a full-resolution decode, so this bounds the memory kept, not the
    /// peak during decoding.
    Prescaled,
    /// `image::load_from_memory`.
    Standard,
    /// Trust the sniffed signature instead of guessing.
    SniffedFormat,
    /// Read the header and check dimensions before materializing any pixels.
    HeaderFirst,
    /// Ignore the signature and try every known format in turn, with no decoder limits.
    AnyFormat,
}
impl DecodeStrategy {
    /// The order strategies are tried in.
    pub const CHAIN: [DecodeStrategy; 5] = [
        DecodeStrategy::Prescaled,
        DecodeStrategy::Standard,
        DecodeStrategy::SniffedFormat,
        DecodeStrategy::HeaderFirst,
        DecodeStrategy::AnyFormat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DecodeStrategy::Prescaled => "prescaled",
            DecodeStrategy::Standard => "standard",
            DecodeStrategy::SniffedFormat => "sniffed-format",
            DecodeStrategy::HeaderFirst => "header-first",
            DecodeStrategy::AnyFormat => "any-format",
        }
    }

    pub fn decode(
        self,
        input: ValidatedBytes<'_>,
        max_width: Option<u32>,
    ) -> image::ImageResult<DynamicImage> {
        let bytes = input.bytes();
        match self {
            DecodeStrategy::Prescaled => {
                let image = ImageReader::new(Cursor::new(bytes))
                    .with_guessed_format()?
                    .decode()?;
                Ok(match max_width {
                    Some(max_width) => fit_width(image, max_width),
                    None => image,
                })
            }
            DecodeStrategy::Standard => image::load_from_memory(bytes),
            DecodeStrategy::SniffedFormat => {
                image::load_from_memory_with_format(bytes, input.signature().format())
            }
            DecodeStrategy::HeaderFirst => {
                let decoder =
                    ImageReader::with_format(Cursor::new(bytes), input.signature().format())
                        .into_decoder()?;
                let (width, height) = decoder.dimensions();
                if width == 0 || height == 0 {
                    return Err(image::ImageError::Limits(
                        image::error::LimitError::from_kind(
                            image::error::LimitErrorKind::DimensionError,
                        ),
                    ));
                }
                DynamicImage::from_decoder(decoder)
            }
            DecodeStrategy::AnyFormat => {
                let mut last_error = None;
                for signature in ImageSignature::MAGIC.map(|(signature, _)| signature) {
                    let mut reader = ImageReader::with_format(Cursor::new(bytes), signature.format());
                    reader.no_limits();
                    match reader.decode() {
                        Ok(image) => return Ok(image),
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    image::ImageError::Unsupported(
                        image::error::UnsupportedError::from_format_and_kind(
                            image::error::ImageFormatHint::Unknown,
                            image::error::UnsupportedErrorKind::Format(
                                image::error::ImageFormatHint::Unknown,
                            ),
                        ),
                    )
                }))
            }
        }
    }
}

/// Runs `chain` in order and returns the first usable image, bounded to `max_width` if given.
pub fn decode_with(
    input: ValidatedBytes<'_>,
    max_width: Option<u32>,
    chain: &[DecodeStrategy],
) -> Option<DecodedImage> {
    for strategy in chain {
        match strategy.decode(input, max_width) {
            Ok(image) => {
                let image = match max_width {
                    Some(max_width) => fit_width(image, max_width),
                    None => image,
                };
                if let Some(decoded) = DecodedImage::new(image.into_rgba8()) {
                    return Some(decoded);
                }
                tracing::debug!("{} decode produced an empty image", strategy.name());
            }
            Err(e) => {
                tracing::debug!("{} decode failed: {e}", strategy.name());
            }
        }
    }
    None
}

/// Downscale `image` so it is at most `max_width` wide, keeping its aspect ratio.
fn fit_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    if max_width == 0 || image.width() <= max_width {
        return image;
    }
    let height = ((image.height() as u64 * max_width as u64) / image.width() as u64).max(1) as u32;
    image.resize_exact(max_width, height, imageops::FilterType::Triangle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A noisy RGB image, so encoders can't shrink it below [`MIN_IMAGE_BYTES`].
    pub(crate) fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }))
    }

    pub(crate) fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        match format {
            ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut buffer, format)
                .unwrap(),
            _ => image.write_to(&mut buffer, format).unwrap(),
        }
        buffer.into_inner()
    }

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        encode(&test_image(width, height), ImageFormat::Jpeg)
    }

    #[test]
    fn test_sniff_known_signatures() {
        assert_eq!(
            ImageSignature::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageSignature::Jpeg)
        );
        assert_eq!(
            ImageSignature::sniff(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(ImageSignature::Png)
        );
        assert_eq!(ImageSignature::sniff(b"GIF89a"), Some(ImageSignature::Gif));
        assert_eq!(ImageSignature::sniff(b"BM\0\0"), Some(ImageSignature::Bmp));
        assert_eq!(ImageSignature::sniff(b"RIFF....WEBP"), None);
        // A truncated PNG magic is not a PNG.
        assert_eq!(ImageSignature::sniff(&[0x89, 0x50, 0x4E, 0x47]), None);
    }

    #[test]
    fn test_validate_rejects_short_and_unknown_bytes() {
        let mut short_jpeg = vec![0xFF, 0xD8, 0xFF];
        short_jpeg.resize(MIN_IMAGE_BYTES - 1, 0);
        assert!(validate(&short_jpeg).is_none());

        assert!(validate(&[0u8; 4096]).is_none());
        assert!(validate(b"").is_none());

        let mut long_jpeg = short_jpeg.clone();
        long_jpeg.push(0);
        assert_eq!(
            validate(&long_jpeg).map(|v| v.signature()),
            Some(ImageSignature::Jpeg)
        );
    }

    #[test]
    fn test_decode_thumbnail_is_bounded() {
        let bytes = jpeg_bytes(320, 200);
        let input = validate(&bytes).unwrap();

        let thumbnail = decode_with(input, Some(160), &DecodeStrategy::CHAIN).unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (160, 100));

        let original = decode_with(input, None, &DecodeStrategy::CHAIN).unwrap();
        assert_eq!((original.width(), original.height()), (320, 200));
    }

    #[test]
    fn test_small_images_are_not_upscaled() {
        let bytes = encode(&test_image(64, 48), ImageFormat::Png);
        let input = validate(&bytes).unwrap();

        let thumbnail = decode_with(input, Some(160), &DecodeStrategy::CHAIN).unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (64, 48));
    }

    #[test]
    fn test_every_strategy_decodes_a_clean_image() {
        let bytes = encode(&test_image(40, 30), ImageFormat::Png);
        let input = validate(&bytes).unwrap();

        for strategy in DecodeStrategy::CHAIN {
            let image = strategy.decode(input, None).unwrap();
            assert_eq!((image.width(), image.height()), (40, 30), "{}", strategy.name());
        }
    }

    #[test]
    fn test_bmp_and_gif_decode() {
        for format in [ImageFormat::Bmp, ImageFormat::Gif] {
            let bytes = encode(&test_image(24, 24), format);
            let input = validate(&bytes).unwrap();
            let image = decode_with(input, None, &DecodeStrategy::CHAIN).unwrap();
            assert_eq!((image.width(), image.height()), (24, 24));
        }
    }

    #[test]
    fn test_garbage_after_valid_magic_fails_every_strategy() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF];
        bytes.extend(std::iter::repeat_n(0x42, 500));
        let input = validate(&bytes).unwrap();

        assert!(decode_with(input, Some(160), &DecodeStrategy::CHAIN).is_none());
    }

    #[test]
    fn test_chain_is_only_as_good_as_its_strategies() {
        let png = encode(&test_image(32, 32), ImageFormat::Png);
        let input = validate(&png).unwrap();

        assert!(decode_with(input, None, &[DecodeStrategy::SniffedFormat]).is_some());
        assert!(decode_with(input, None, &[]).is_none());
    }

    #[test]
    fn test_decoded_image_rejects_empty() {
        assert!(DecodedImage::new(RgbaImage::new(0, 10)).is_none());
        assert!(DecodedImage::new(RgbaImage::new(10, 0)).is_none());
        let image = DecodedImage::new(RgbaImage::new(3, 2)).unwrap();
        assert_eq!(format!("{image:?}"), "DecodedImage(3x2)");
        assert!(image.ptr_eq(&image.clone()));
    }
}
