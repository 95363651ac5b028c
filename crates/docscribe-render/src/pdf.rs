//! PDF output built directly with lopdf.
//!
//! Uses the standard Helvetica faces, so nothing is embedded and text is
//! limited to WinAnsiEncoding. Layout is a simple top-down flow: greedy
//! word-wrap with approximate glyph widths and a new page whenever the
//! next line would cross the bottom margin.

use docscribe_core::GeneratedDocument;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};

use crate::RenderError;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 64.0;
const LINE_SPACING: f32 = 1.35;
const BULLET_INDENT: f32 = 16.0;

const TITLE_SIZE: f32 = 20.0;
const HEADING_SIZE: f32 = 14.0;
const BODY_SIZE: f32 = 11.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

fn char_width(c: char, font: Font, size: f32) -> f32 {
    let base = match c as u32 {
        code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize] as f32,
        _ => 556.0,
    };
    // Bold glyphs run roughly 6% wider.
    let base = if font == Font::Bold { base * 1.06 } else { base };
    base * size / 1000.0
}

fn text_width(text: &str, font: Font, size: f32) -> f32 {
    text.chars().map(|c| char_width(c, font, size)).sum()
}

/// Map a character to its WinAnsiEncoding byte, `?` when unrepresentable.
fn winansi_byte(c: char) -> u8 {
    match c {
        '\t' => b' ',
        ' '..='~' => c as u8,
        '\u{A0}'..='\u{FF}' => c as u32 as u8,
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => b'?',
    }
}

pub(crate) fn encode_winansi(text: &str) -> Vec<u8> {
    text.chars().map(winansi_byte).collect()
}

/// Greedy word-wrap to `max_width` points. Words wider than a whole line
/// are broken between characters.
pub(crate) fn wrap(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let space = char_width(' ', font, size);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0.0;

    for word in text.split_whitespace() {
        let word_width = text_width(word, font, size);

        if word_width > max_width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_width = 0.0;
            }
            for c in word.chars() {
                let w = char_width(c, font, size);
                if current_width + w > max_width && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                    current_width = 0.0;
                }
                current.push(c);
                current_width += w;
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_width
        } else {
            current_width + space + word_width
        };
        if needed > max_width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_width = 0.0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_width += space;
        }
        current.push_str(word);
        current_width += word_width;
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Accumulates page content streams while flowing text down the page.
struct Layout {
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            ops: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn new_page(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        self.pages.push(ops);
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn at_page_top(&self) -> bool {
        self.ops.is_empty()
    }

    /// Make sure `height` more points fit on the page, starting a new one if not.
    fn reserve(&mut self, height: f32) {
        if self.y - height < MARGIN && !self.at_page_top() {
            self.new_page();
        }
    }

    fn gap(&mut self, points: f32) {
        if !self.at_page_top() {
            self.y -= points;
        }
    }

    fn line(&mut self, x: f32, font: Font, size: f32, text: &str) {
        let leading = size * LINE_SPACING;
        self.reserve(leading);
        self.y -= leading;
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.resource_name().into(), size.into()]),
            Operation::new("Td", vec![x.into(), self.y.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_winansi(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    fn paragraph(&mut self, x: f32, font: Font, size: f32, text: &str) {
        let width = PAGE_WIDTH - MARGIN - x;
        for line in wrap(text, font, size, width) {
            self.line(x, font, size, &line);
        }
    }

    fn bullet(&mut self, text: &str) {
        let x = MARGIN + BULLET_INDENT;
        let width = PAGE_WIDTH - MARGIN - x;
        for (i, line) in wrap(text, Font::Regular, BODY_SIZE, width).iter().enumerate() {
            self.line(x, Font::Regular, BODY_SIZE, line);
            if i == 0 {
                // Marker shares the baseline of the first line.
                self.ops.extend([
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), BODY_SIZE.into()]),
                    Operation::new("Td", vec![(MARGIN + 4.0).into(), self.y.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(vec![0x95], StringFormat::Literal)],
                    ),
                    Operation::new("ET", vec![]),
                ]);
            }
        }
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        if !self.ops.is_empty() || self.pages.is_empty() {
            self.new_page();
        }
        self.pages
    }
}

fn layout(doc: &GeneratedDocument) -> Vec<Vec<Operation>> {
    let mut layout = Layout::new();
    let body_leading = BODY_SIZE * LINE_SPACING;

    layout.paragraph(MARGIN, Font::Bold, TITLE_SIZE, doc.title.trim());
    layout.gap(body_leading);

    if let Some(summary) = &doc.summary {
        layout.paragraph(MARGIN, Font::Regular, BODY_SIZE, summary);
        layout.gap(body_leading * 0.5);
    }

    for section in &doc.sections {
        if !section.heading.is_empty() {
            layout.gap(body_leading * 0.5);
            // Keep a heading together with at least two lines of its body.
            layout.reserve(HEADING_SIZE * LINE_SPACING + 2.0 * body_leading);
            layout.paragraph(MARGIN, Font::Bold, HEADING_SIZE, &section.heading);
            layout.gap(body_leading * 0.25);
        }
        for p in &section.paragraphs {
            layout.paragraph(MARGIN, Font::Regular, BODY_SIZE, p);
            layout.gap(body_leading * 0.5);
        }
        for b in &section.bullets {
            layout.bullet(b);
        }
        if !section.bullets.is_empty() {
            layout.gap(body_leading * 0.5);
        }
    }

    layout.finish()
}

fn font_dict(base_font: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Render a document as PDF bytes.
pub fn render_pdf(doc: &GeneratedDocument) -> Result<Vec<u8>, RenderError> {
    let mut pdf = Document::with_version("1.5");
    let pages_id: ObjectId = pdf.new_object_id();

    let regular_id = pdf.add_object(font_dict("Helvetica"));
    let bold_id = pdf.add_object(font_dict("Helvetica-Bold"));
    let resources_id = pdf.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let mut kids = Vec::new();
    for operations in layout(doc) {
        let content = Content { operations };
        let content_id = pdf.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let page_count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = pdf.add_object(dictionary! {
        "Title" => Object::String(encode_winansi(doc.title.trim()), StringFormat::Literal),
        "Producer" => Object::string_literal("docscribe"),
    });
    pdf.trailer.set("Root", catalog_id);
    pdf.trailer.set("Info", info_id);
    pdf.compress();

    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes)?;
    tracing::debug!(pages = page_count, bytes = bytes.len(), "wrote PDF");
    Ok(bytes)
}
