//! A4 health report PDF built directly with lopdf.

use lopdf::{dictionary, Document, Object, Stream};

use super::{DocumentRenderer, RenderError, RenderRequest};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
/// Lowest baseline for body text; the footer sits below it.
const BODY_BOTTOM: f32 = 90.0;

const TITLE: &str = "HEALTH REPORT";
const INFO_HEADING: &str = "Patient Information";
const REPORT_HEADING: &str = "Medical Analysis & Recommendations";
const DISCLAIMER: [&str; 2] = [
    "This report was generated by AI Health Report Manager.",
    "Please consult with your healthcare provider for professional medical advice.",
];

/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

#[derive(Debug, Clone)]
struct PlacedLine {
    font: Font,
    size: f32,
    x: f32,
    y: f32,
    text: String,
}

/// Accumulates lines top-down, starting a new page when the body area is full.
struct Layout {
    pages: Vec<Vec<PlacedLine>>,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn skip(&mut self, gap: f32) {
        self.y -= gap;
    }

    fn line(&mut self, font: Font, size: f32, leading: f32, text: String, centered: bool) {
        if self.y - leading < BODY_BOTTOM {
            self.pages.push(Vec::new());
            self.y = PAGE_HEIGHT - MARGIN;
        }
        self.y -= leading;
        let x = if centered {
            ((PAGE_WIDTH - text_width(&text, size)) / 2.0).max(MARGIN)
        } else {
            MARGIN
        };
        let y = self.y;
        if let Some(page) = self.pages.last_mut() {
            page.push(PlacedLine {
                font,
                size,
                x,
                y,
                text,
            });
        }
    }

    fn paragraph(&mut self, text: &str, size: f32, leading: f32) {
        let max_chars = ((PAGE_WIDTH - 2.0 * MARGIN) / (size * AVG_GLYPH_WIDTH)) as usize;
        for line in wrap(text, max_chars) {
            self.line(Font::Regular, size, leading, line, false);
        }
    }
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * AVG_GLYPH_WIDTH
}

/// Greedy word wrap; words longer than a line are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Splits report text on blank lines and collapses whitespace inside paragraphs.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out.into_iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Byte for `c` in WinAnsiEncoding, the encoding both fonts are declared with.
fn win_ansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        '\u{20}'..='\u{7E}' | '\u{A0}'..='\u{FF}' => c as u8,
        '\u{20AC}' => 0x80,
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Encodes text as WinAnsi bytes. Whitespace becomes a space; characters the
/// encoding lacks become `?`.
fn win_ansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match win_ansi_byte(c) {
            Some(byte) => byte,
            None if c.is_whitespace() => b' ',
            None => b'?',
        })
        .collect()
}

/// WinAnsi bytes for a PDF literal string, with delimiters escaped.
fn escape_pdf_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for byte in win_ansi(s) {
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out
}

/// Appends one positioned text object to a content stream.
fn show_text(content: &mut Vec<u8>, font: Font, size: f32, x: f32, y: f32, text: &str) {
    content.extend_from_slice(
        format!("BT\n/{} {} Tf\n{:.2} {:.2} Td\n(", font.resource(), size, x, y).as_bytes(),
    );
    content.extend(escape_pdf_string(text));
    content.extend_from_slice(b") Tj\nET\n");
}

fn pdf_date(request: &RenderRequest) -> String {
    request
        .generated_at
        .format("D:%Y%m%d%H%M%S+00'00'")
        .to_string()
}

/// Renders the health report layout: title, patient information block,
/// report paragraphs, and a disclaimer footer with page numbers.
#[derive(Debug, Clone, Default)]
pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        Self
    }

    fn layout(request: &RenderRequest) -> Vec<Vec<PlacedLine>> {
        let mut layout = Layout::new();

        layout.line(Font::Bold, 18.0, 22.0, TITLE.to_string(), true);
        layout.skip(18.0);

        layout.line(Font::Bold, 14.0, 18.0, INFO_HEADING.to_string(), false);
        layout.skip(4.0);
        let info = [
            format!("Patient ID: {}", request.patient_id),
            format!("Name: {}", request.name),
            format!("Age: {} years", request.age),
            format!("Email: {}", request.email),
            format!(
                "Report Date: {}",
                request.generated_at.format("%Y-%m-%d %H:%M UTC")
            ),
        ];
        for line in info {
            layout.paragraph(&line, 11.0, 16.0);
        }
        layout.skip(16.0);

        layout.line(Font::Bold, 14.0, 18.0, REPORT_HEADING.to_string(), false);
        layout.skip(4.0);
        for paragraph in paragraphs(&request.report_text) {
            layout.paragraph(&paragraph, 11.0, 15.0);
            layout.skip(8.0);
        }

        layout.pages
    }

    fn content_stream(lines: &[PlacedLine], page_no: usize, page_count: usize) -> Vec<u8> {
        let mut content = Vec::new();
        for line in lines {
            show_text(&mut content, line.font, line.size, line.x, line.y, &line.text);
        }

        let mut footer_y = 52.0;
        for text in DISCLAIMER {
            let x = (PAGE_WIDTH - text_width(text, 8.0)) / 2.0;
            show_text(&mut content, Font::Regular, 8.0, x, footer_y, text);
            footer_y -= 10.0;
        }
        let page_label = format!("Page {} of {}", page_no, page_count);
        show_text(
            &mut content,
            Font::Regular,
            8.0,
            PAGE_WIDTH - MARGIN - text_width(&page_label, 8.0),
            footer_y - 6.0,
            &page_label,
        );

        content
    }
}

impl DocumentRenderer for PdfRenderer {
    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        if request.patient_id.trim().is_empty() {
            return Err(RenderError::MissingField("patient_id"));
        }
        if request.name.trim().is_empty() {
            return Err(RenderError::MissingField("name"));
        }
        if request.report_text.trim().is_empty() {
            return Err(RenderError::MissingField("report_text"));
        }

        let pages = Self::layout(request);
        let page_count = pages.len();

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(page_count);
        for (index, lines) in pages.iter().enumerate() {
            let content = Self::content_stream(lines, index + 1, page_count);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(win_ansi(&format!("Health Report - {}", request.name))),
            "Subject" => Object::string_literal(format!("Patient {}", request.patient_id)),
            "Producer" => Object::string_literal("medreport"),
            "CreationDate" => Object::string_literal(pdf_date(request)),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;

        Ok(buffer)
    }
}
