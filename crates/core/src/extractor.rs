use crate::error::IngestError;
use crate::traits::{ContentPart, TextGenerator};
use crate::{ExtractedText, ImageRecord, PageText};
use chrono::Utc;
use flate2::read::ZlibDecoder;
use lopdf::xobject::PdfImage;
use lopdf::{Dictionary, Document};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Marker the LLM is asked to put between pages.
pub const PAGE_BREAK_MARKER: &str = "=== PAGE BREAK ===";

const LLM_EXTRACTION_PROMPT: &str = "Extract ALL the text of this PDF document. \
Include every title, paragraph, list, table and any other visible text. \
Keep the original structure and formatting as closely as possible. \
Separate consecutive pages with a line containing only: === PAGE BREAK ===";

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Extracts the document text, page by page.
///
/// lopdf is tried first. When it cannot read any text and a generator is
/// supplied, the whole PDF is sent to the LLM instead.
pub async fn extract_document_text(
    path: &Path,
    fallback: Option<&dyn TextGenerator>,
) -> Result<ExtractedText, IngestError> {
    let checksum = digest_file(path)?;

    let pages = match LopdfExtractor.extract_pages(path) {
        Ok(pages) => pages,
        Err(IngestError::PdfParse(parse_error)) => match fallback {
            Some(generator) => {
                warn!(path = %path.display(), error = %parse_error, "lopdf found no text, asking the llm");
                extract_with_llm(path, generator).await.map_err(|llm_error| {
                    IngestError::PdfParse(format!("{parse_error}; llm fallback failed: {llm_error}"))
                })?
            }
            None => return Err(IngestError::PdfParse(parse_error)),
        },
        Err(error) => return Err(error),
    };

    let full_text = pages
        .iter()
        .map(|page| page.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    info!(path = %path.display(), pages = pages.len(), chars = full_text.chars().count(), "text extracted");

    Ok(ExtractedText {
        full_text,
        source_file: path.to_string_lossy().to_string(),
        pages,
        checksum,
        extracted_at: Utc::now(),
    })
}

async fn extract_with_llm(
    path: &Path,
    generator: &dyn TextGenerator,
) -> Result<Vec<PageText>, IngestError> {
    let pdf = tokio::fs::read(path).await?;
    let text = generator
        .generate(vec![
            ContentPart::InlineData {
                mime_type: "application/pdf".to_string(),
                data: pdf,
            },
            ContentPart::Text(LLM_EXTRACTION_PROMPT.to_string()),
        ])
        .await?;

    let pages = split_llm_pages(&text);
    if pages.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "llm response has no readable text: {}",
            path.display()
        )));
    }
    Ok(pages)
}

/// Splits an LLM transcript into pages on page-break markers or form feeds.
pub fn split_llm_pages(text: &str) -> Vec<PageText> {
    text.replace(PAGE_BREAK_MARKER, "\u{000c}")
        .split('\u{000c}')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .enumerate()
        .map(|(index, page)| PageText {
            number: (index + 1) as u32,
            text: page.to_string(),
        })
        .collect()
}

/// File extension for image streams that can be written out unchanged.
pub fn passthrough_extension(filters: &[String]) -> Option<&'static str> {
    match filters {
        [only] => match only.as_str() {
            "DCTDecode" => Some("jpg"),
            "JPXDecode" => Some("jp2"),
            _ => None,
        },
        _ => None,
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("jp2") => "image/jp2",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Writes every embedded image of the PDF to `images_dir`.
///
/// JPEG and JPEG2000 streams are copied as they are. Raw and Flate-compressed
/// rasters are re-encoded as PNG. Images that cannot be decoded are skipped.
pub fn extract_images(path: &Path, images_dir: &Path) -> Result<Vec<ImageRecord>, IngestError> {
    let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
    fs::create_dir_all(images_dir)?;

    let mut records = Vec::new();
    for (page_no, page_id) in document.get_pages() {
        let images = match document.get_page_images(page_id) {
            Ok(images) => images,
            Err(error) => {
                debug!(page = page_no, %error, "page has no readable images");
                continue;
            }
        };

        let mut image_index = 0u32;
        for image in images {
            let (extension, bytes) = match encode_image(&document, &image) {
                Ok(encoded) => encoded,
                Err(error) => {
                    warn!(page = page_no, object = ?image.id, %error, "skipping image");
                    continue;
                }
            };

            image_index += 1;
            let filename = format!("page_{page_no}_img_{image_index}.{extension}");
            let image_path = images_dir.join(&filename);
            fs::write(&image_path, bytes)?;

            info!(file = %filename, width = image.width, height = image.height, "image extracted");
            records.push(ImageRecord {
                page: page_no,
                image_index,
                filename,
                path: image_path.to_string_lossy().to_string(),
                width: image.width,
                height: image.height,
                description: String::new(),
                kind: Default::default(),
                analyzed: false,
            });
        }
    }

    Ok(records)
}

fn encode_image(
    document: &Document,
    image: &PdfImage,
) -> Result<(&'static str, Vec<u8>), IngestError> {
    let filters = image.filters.as_deref().unwrap_or_default();
    if let Some(extension) = passthrough_extension(filters) {
        return Ok((extension, image.content.to_vec()));
    }
    Ok(("png", raster_to_png(document, image)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Gray,
    Rgb,
    Cmyk,
}

impl PixelLayout {
    fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
            PixelLayout::Cmyk => 4,
        }
    }

    fn from_components(components: i64) -> Option<Self> {
        match components {
            1 => Some(PixelLayout::Gray),
            3 => Some(PixelLayout::Rgb),
            4 => Some(PixelLayout::Cmyk),
            _ => None,
        }
    }
}

fn pixel_layout(document: &Document, image: &PdfImage) -> Option<PixelLayout> {
    match image.color_space.as_deref()? {
        "DeviceGray" | "CalGray" => Some(PixelLayout::Gray),
        "DeviceRGB" | "CalRGB" => Some(PixelLayout::Rgb),
        "DeviceCMYK" => Some(PixelLayout::Cmyk),
        "ICCBased" => {
            let profile = image.origin_dict.get(b"ColorSpace").ok()?.as_array().ok()?.get(1)?;
            let (_, profile) = document.dereference(profile).ok()?;
            let components = profile.as_stream().ok()?.dict.get(b"N").ok()?.as_i64().ok()?;
            PixelLayout::from_components(components)
        }
        _ => None,
    }
}

fn predictor(document: &Document, dict: &Dictionary) -> i64 {
    dict.get(b"DecodeParms")
        .ok()
        .and_then(|params| document.dereference(params).ok())
        .and_then(|(_, params)| params.as_dict().ok())
        .and_then(|params| params.get(b"Predictor").ok())
        .and_then(|predictor| predictor.as_i64().ok())
        .unwrap_or(1)
}

fn encoding_error(message: impl ToString) -> IngestError {
    IngestError::ImageEncoding(message.to_string())
}

/// Decodes an 8-bit gray, RGB or CMYK raster and encodes it as PNG.
fn raster_to_png(document: &Document, image: &PdfImage) -> Result<Vec<u8>, IngestError> {
    let layout = pixel_layout(document, image)
        .ok_or_else(|| encoding_error(format!("unsupported color space {:?}", image.color_space)))?;
    if image.bits_per_component != Some(8) {
        return Err(encoding_error(format!(
            "unsupported bits per component {:?}",
            image.bits_per_component
        )));
    }
    let width = u32::try_from(image.width).map_err(encoding_error)?;
    let height = u32::try_from(image.height).map_err(encoding_error)?;

    let filters = image.filters.as_deref().unwrap_or_default();
    let mut data = match filters {
        [] => image.content.to_vec(),
        [only] if only == "FlateDecode" => inflate(image.content)?,
        other => return Err(encoding_error(format!("unsupported filters {other:?}"))),
    };

    let channels = layout.channels();
    let row_len = width as usize * channels;
    if predictor(document, image.origin_dict) >= 10 {
        data = undo_png_predictor(&data, row_len, channels)?;
    }

    let expected = row_len * height as usize;
    if data.len() < expected {
        return Err(encoding_error(format!(
            "{} bytes of pixel data for a {width}x{height} image",
            data.len()
        )));
    }
    data.truncate(expected);

    let (pixels, color) = match layout {
        PixelLayout::Gray => (data, png::ColorType::Grayscale),
        PixelLayout::Rgb => (data, png::ColorType::Rgb),
        PixelLayout::Cmyk => (cmyk_to_rgb(&data), png::ColorType::Rgb),
    };
    encode_png(&pixels, width, height, color)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut decoded = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}

/// Reverses the per-row PNG filters used by `Predictor >= 10`.
fn undo_png_predictor(data: &[u8], row_len: usize, bytes_per_pixel: usize) -> Result<Vec<u8>, IngestError> {
    let stride = row_len + 1;
    let mut decoded = Vec::with_capacity(data.len() / stride * row_len);
    let mut previous = vec![0u8; row_len];

    for row in data.chunks_exact(stride) {
        let (filter, encoded) = (row[0], &row[1..]);
        let mut current = vec![0u8; row_len];
        for i in 0..row_len {
            let left = if i >= bytes_per_pixel { current[i - bytes_per_pixel] } else { 0 };
            let up = previous[i];
            let upper_left = if i >= bytes_per_pixel { previous[i - bytes_per_pixel] } else { 0 };
            let predicted = match filter {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
                4 => paeth(left, up, upper_left),
                other => return Err(encoding_error(format!("unknown png row filter {other}"))),
            };
            current[i] = encoded[i].wrapping_add(predicted);
        }
        decoded.extend_from_slice(&current);
        previous = current;
    }

    Ok(decoded)
}

fn paeth(left: u8, up: u8, upper_left: u8) -> u8 {
    let estimate = i16::from(left) + i16::from(up) - i16::from(upper_left);
    let to_left = (estimate - i16::from(left)).abs();
    let to_up = (estimate - i16::from(up)).abs();
    let to_upper_left = (estimate - i16::from(upper_left)).abs();
    if to_left <= to_up && to_left <= to_upper_left {
        left
    } else if to_up <= to_upper_left {
        up
    } else {
        upper_left
    }
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|pixel| {
            let black = 255 - u16::from(pixel[3]);
            let channel = |ink: u8| ((255 - u16::from(ink)) * black / 255) as u8;
            [channel(pixel[0]), channel(pixel[1]), channel(pixel[2])]
        })
        .collect()
}

fn encode_png(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: png::ColorType,
) -> Result<Vec<u8>, IngestError> {
    let mut encoded = Vec::new();
    let mut encoder = png::Encoder::new(&mut encoded, width, height);
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(encoding_error)?;
    writer.write_image_data(pixels).map_err(encoding_error)?;
    writer.finish().map_err(encoding_error)?;
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmError;
    use async_trait::async_trait;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    struct CannedGenerator(&'static str);

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, parts: Vec<ContentPart>) -> Result<String, LlmError> {
            assert!(matches!(&parts[0], ContentPart::InlineData { mime_type, .. } if mime_type == "application/pdf"));
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn llm_transcript_is_split_on_markers_and_form_feeds() {
        let pages = split_llm_pages("First page\n=== PAGE BREAK ===\n  \n=== PAGE BREAK ===\nSecond\u{000c}Third\n");
        let texts: Vec<&str> = pages.iter().map(|page| page.text.as_str()).collect();
        assert_eq!(texts, vec!["First page", "Second", "Third"]);
        assert_eq!(pages[2].number, 3);
    }

    #[test]
    fn only_passthrough_filters_get_an_extension() {
        assert_eq!(passthrough_extension(&["DCTDecode".to_string()]), Some("jpg"));
        assert_eq!(passthrough_extension(&["JPXDecode".to_string()]), Some("jp2"));
        assert_eq!(
            passthrough_extension(&["FlateDecode".to_string(), "DCTDecode".to_string()]),
            None
        );
        assert_eq!(passthrough_extension(&["FlateDecode".to_string()]), None);
        assert_eq!(passthrough_extension(&[]), None);
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_type_for(Path::new("a/page_1_img_1.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("b.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("c")), "application/octet-stream");
    }

    #[tokio::test]
    async fn unreadable_pdf_without_fallback_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_document_text(&path, None).await;
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_pdf_falls_back_to_llm() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scanned.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let generator = CannedGenerator("Title\n=== PAGE BREAK ===\nBody");
        let extracted = extract_document_text(&path, Some(&generator)).await?;

        assert_eq!(extracted.pages.len(), 2);
        assert_eq!(extracted.full_text, "Title\n\nBody");
        assert_eq!(extracted.checksum, digest_file(&path)?);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    fn zlib(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()
    }

    /// One-page PDF drawing a single image XObject.
    fn write_pdf_with_image(
        path: &Path,
        image: Dictionary,
        content: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(image, content));

        let drawing = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![2.into(), 0.into(), 0.into(), 2.into(), 0.into(), 0.into()]),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, drawing.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            "MediaBox" => vec![0.into(), 0.into(), 2.into(), 2.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }

    fn read_png(path: &Path) -> Result<(u32, u32, png::ColorType, Vec<u8>), Box<dyn std::error::Error>> {
        let decoder = png::Decoder::new(fs::File::open(path)?);
        let mut reader = decoder.read_info()?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buffer)?;
        buffer.truncate(frame.buffer_size());
        Ok((frame.width, frame.height, frame.color_type, buffer))
    }

    #[test]
    fn flate_rgb_image_is_written_as_png() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("figure.pdf");
        let pixels: Vec<u8> = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        write_pdf_with_image(
            &pdf,
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            zlib(&pixels)?,
        )?;

        let images_dir = dir.path().join("images");
        let records = extract_images(&pdf, &images_dir)?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename, "page_1_img_1.png");
        assert_eq!((records[0].page, records[0].width, records[0].height), (1, 2, 2));

        let written = images_dir.join("page_1_img_1.png");
        assert!(fs::read(&written)?.starts_with(b"\x89PNG"));
        let (width, height, color, decoded) = read_png(&written)?;
        assert_eq!((width, height), (2, 2));
        assert_eq!(color, png::ColorType::Rgb);
        assert_eq!(decoded, pixels);
        Ok(())
    }

    #[test]
    fn raw_cmyk_image_is_converted_to_rgb() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("cmyk.pdf");
        // cyan, magenta, black, paper
        let cmyk: Vec<u8> = vec![255, 0, 0, 0, 0, 255, 0, 0, 0, 0, 0, 255, 0, 0, 0, 0];
        write_pdf_with_image(
            &pdf,
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceCMYK",
                "BitsPerComponent" => 8,
            },
            cmyk,
        )?;

        let images_dir = dir.path().join("images");
        let records = extract_images(&pdf, &images_dir)?;
        assert_eq!(records[0].filename, "page_1_img_1.png");

        let (_, _, color, decoded) = read_png(&images_dir.join("page_1_img_1.png"))?;
        assert_eq!(color, png::ColorType::Rgb);
        assert_eq!(
            decoded,
            vec![0, 255, 255, 255, 0, 255, 0, 0, 0, 255, 255, 255]
        );
        Ok(())
    }

    #[test]
    fn undecodable_images_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("indexed.pdf");
        write_pdf_with_image(
            &pdf,
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceN",
                "BitsPerComponent" => 8,
            },
            vec![0; 4],
        )?;

        let records = extract_images(&pdf, &dir.path().join("images"))?;
        assert!(records.is_empty());
        Ok(())
    }

    #[test]
    fn png_predictor_rows_are_reconstructed() -> Result<(), Box<dyn std::error::Error>> {
        // two gray rows of three pixels: Sub then Up
        let encoded = [1, 10, 5, 5, 2, 1, 1, 1];
        let decoded = undo_png_predictor(&encoded, 3, 1)?;
        assert_eq!(decoded, vec![10, 15, 20, 11, 16, 21]);
        Ok(())
    }

    #[test]
    fn paeth_prefers_the_closest_neighbour() {
        assert_eq!(paeth(10, 20, 10), 20);
        assert_eq!(paeth(20, 10, 10), 20);
        assert_eq!(paeth(0, 0, 0), 0);
    }
}
