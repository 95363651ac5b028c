//! Minimal WordprocessingML (DOCX) writer.
//!
//! The package holds just enough parts for Word, LibreOffice and Pages to
//! open it: content types, package and document relationships, core
//! properties, styles, numbering (for bullets) and the document body.

use std::io::{Cursor, Write};

use docscribe_core::GeneratedDocument;
use quick_xml::escape::escape;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::RenderError;

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// numId of the bullet list defined in numbering.xml.
const BULLET_NUM_ID: u32 = 1;

const CONTENT_TYPES: &str = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/word/numbering.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering" Target="numbering.xml"/></Relationships>"#;

fn styles_xml() -> String {
    format!(
        concat!(
            r#"<w:styles xmlns:w="{ns}">"#,
            r#"<w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:eastAsia="Calibri" w:cs="Calibri"/><w:sz w:val="22"/><w:szCs w:val="22"/><w:lang w:val="en-US"/></w:rPr></w:rPrDefault>"#,
            r#"<w:pPrDefault><w:pPr><w:spacing w:after="160" w:line="276" w:lineRule="auto"/></w:pPr></w:pPrDefault></w:docDefaults>"#,
            r#"<w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style>"#,
            r#"<w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/>"#,
            r#"<w:pPr><w:spacing w:after="240"/></w:pPr><w:rPr><w:b/><w:sz w:val="48"/><w:szCs w:val="48"/></w:rPr></w:style>"#,
            r#"<w:style w:type="paragraph" w:styleId="Subtitle"><w:name w:val="Subtitle"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/>"#,
            r#"<w:rPr><w:i/><w:color w:val="404040"/></w:rPr></w:style>"#,
            r#"<w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/>"#,
            r#"<w:pPr><w:keepNext/><w:spacing w:before="240" w:after="80"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:color w:val="1F3864"/><w:sz w:val="32"/><w:szCs w:val="32"/></w:rPr></w:style>"#,
            r#"<w:style w:type="paragraph" w:styleId="ListParagraph"><w:name w:val="List Paragraph"/><w:basedOn w:val="Normal"/><w:qFormat/>"#,
            r#"<w:pPr><w:spacing w:after="60"/><w:ind w:left="720"/><w:contextualSpacing/></w:pPr></w:style>"#,
            r#"</w:styles>"#
        ),
        ns = W_NS
    )
}

fn numbering_xml() -> String {
    format!(
        concat!(
            r#"<w:numbering xmlns:w="{ns}">"#,
            r#"<w:abstractNum w:abstractNumId="0"><w:multiLevelType w:val="hybridMultilevel"/>"#,
            r#"<w:lvl w:ilvl="0"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="{bullet}"/><w:lvlJc w:val="left"/>"#,
            r#"<w:pPr><w:ind w:left="720" w:hanging="360"/></w:pPr><w:rPr><w:rFonts w:ascii="Symbol" w:hAnsi="Symbol" w:hint="default"/></w:rPr></w:lvl>"#,
            r#"</w:abstractNum>"#,
            r#"<w:num w:numId="{num_id}"><w:abstractNumId w:val="0"/></w:num>"#,
            r#"</w:numbering>"#
        ),
        ns = W_NS,
        bullet = "\u{F0B7}",
        num_id = BULLET_NUM_ID
    )
}

/// Escape text for XML, dropping characters XML 1.0 does not allow at all.
fn xml_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|&c| match c {
            '\t' | '\n' | '\r' => true,
            '\u{FFFE}' | '\u{FFFF}' => false,
            c => c >= ' ',
        })
        .collect();
    escape(cleaned.as_str()).into_owned()
}

fn core_xml(title: &str) -> String {
    format!(
        concat!(
            r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            r#"<dc:title>{title}</dc:title><dc:creator>docscribe</dc:creator></cp:coreProperties>"#
        ),
        title = xml_text(title)
    )
}

/// One `<w:p>` with an optional style, optional bullet numbering and a
/// single text run.
fn write_paragraph(out: &mut String, style: Option<&str>, bullet: bool, italic: bool, text: &str) {
    out.push_str("<w:p>");
    if style.is_some() || bullet {
        out.push_str("<w:pPr>");
        if let Some(style) = style {
            out.push_str(&format!(r#"<w:pStyle w:val="{}"/>"#, style));
        }
        if bullet {
            out.push_str(&format!(
                r#"<w:numPr><w:ilvl w:val="0"/><w:numId w:val="{}"/></w:numPr>"#,
                BULLET_NUM_ID
            ));
        }
        out.push_str("</w:pPr>");
    }
    out.push_str("<w:r>");
    if italic {
        out.push_str("<w:rPr><w:i/></w:rPr>");
    }
    // Line breaks inside a paragraph become <w:br/>.
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("<w:br/>");
        }
        out.push_str(&format!(
            r#"<w:t xml:space="preserve">{}</w:t>"#,
            xml_text(line)
        ));
    }
    out.push_str("</w:r></w:p>");
}

/// Build `word/document.xml` for a generated document.
pub fn document_xml(doc: &GeneratedDocument) -> String {
    let mut body = String::with_capacity(8192);

    write_paragraph(&mut body, Some("Title"), false, false, doc.title.trim());
    if let Some(summary) = &doc.summary {
        write_paragraph(&mut body, Some("Subtitle"), false, true, summary);
    }

    for section in &doc.sections {
        if !section.heading.is_empty() {
            write_paragraph(&mut body, Some("Heading1"), false, false, &section.heading);
        }
        for p in &section.paragraphs {
            write_paragraph(&mut body, None, false, false, p);
        }
        for b in &section.bullets {
            write_paragraph(&mut body, Some("ListParagraph"), true, false, b);
        }
    }

    // A4 with 2.54 cm margins.
    format!(
        concat!(
            r#"{decl}<w:document xmlns:w="{ns}"><w:body>{body}"#,
            r#"<w:sectPr><w:pgSz w:w="11906" w:h="16838"/>"#,
            r#"<w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/>"#,
            r#"</w:sectPr></w:body></w:document>"#
        ),
        decl = XML_DECL,
        ns = W_NS,
        body = body
    )
}

/// Render a document as a DOCX package.
pub fn render_docx(doc: &GeneratedDocument) -> Result<Vec<u8>, RenderError> {
    let parts: [(&str, String); 7] = [
        ("[Content_Types].xml", format!("{}{}", XML_DECL, CONTENT_TYPES)),
        ("_rels/.rels", format!("{}{}", XML_DECL, PACKAGE_RELS)),
        ("docProps/core.xml", format!("{}{}", XML_DECL, core_xml(&doc.title))),
        ("word/_rels/document.xml.rels", format!("{}{}", XML_DECL, DOCUMENT_RELS)),
        ("word/styles.xml", format!("{}{}", XML_DECL, styles_xml())),
        ("word/numbering.xml", format!("{}{}", XML_DECL, numbering_xml())),
        ("word/document.xml", document_xml(doc)),
    ];

    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in parts {
        zip.start_file(name, options)?;
        zip.write_all(content.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}
