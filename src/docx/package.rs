use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::{Cursor, Write};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{Block, Document, DocumentStyle, EmbeddedImage, HeadingLevel, ParagraphKind};

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const NS_PACKAGE_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_CORE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";
const REL_EXTENDED: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties";
const REL_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
const REL_IMAGE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const APPLICATION: &str = "notes-to-docx";
const BLACK: &str = "000000";
const RED: &str = "FF0000";

/// Serializes `document` into a complete `.docx` zip.
pub(super) fn write_package(document: &Document, created: OffsetDateTime) -> Result<Vec<u8>> {
    let parts = [
        ("[Content_Types].xml", content_types_xml()?),
        ("_rels/.rels", root_rels_xml()?),
        ("docProps/core.xml", core_xml(created)?),
        ("docProps/app.xml", app_xml()?),
        ("word/document.xml", document_xml(document)?),
        ("word/styles.xml", styles_xml(document.style())?),
        (
            "word/_rels/document.xml.rels",
            document_rels_xml(document)?,
        ),
    ];

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let xml_options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in parts {
        writer
            .start_file(name, xml_options)
            .with_context(|| format!("failed to write zip entry {}", name))?;
        writer
            .write_all(&bytes)
            .with_context(|| format!("failed to write zip content {}", name))?;
    }

    // PNG data is already compressed.
    let media_options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for media in document.media() {
        let name = format!("word/media/{}", media.file_name);
        writer
            .start_file(name.as_str(), media_options)
            .with_context(|| format!("failed to write zip entry {}", name))?;
        writer
            .write_all(&media.bytes)
            .with_context(|| format!("failed to write zip content {}", name))?;
    }

    let bytes = writer
        .finish()
        .with_context(|| "failed to finalize docx package")?
        .into_inner();
    Ok(bytes)
}

struct Xml {
    writer: Writer<Vec<u8>>,
}

impl Xml {
    fn new() -> Result<Self> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        Ok(Self { writer })
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.open(name, attrs)?;
        self.text(text)?;
        self.close(name)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

/// Drops characters XML 1.0 cannot carry. Model output occasionally
/// contains stray control characters.
fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|ch| {
            matches!(ch, '\t' | '\n' | '\r')
                || (!ch.is_control() && !matches!(ch, '\u{FFFE}' | '\u{FFFF}'))
        })
        .collect()
}

fn half_points(size: f32) -> String {
    ((size * 2.0).round() as u32).to_string()
}

fn content_types_xml() -> Result<Vec<u8>> {
    let mut xml = Xml::new()?;
    xml.open(
        "Types",
        &[(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/content-types",
        )],
    )?;
    xml.empty(
        "Default",
        &[
            ("Extension", "rels"),
            (
                "ContentType",
                "application/vnd.openxmlformats-package.relationships+xml",
            ),
        ],
    )?;
    xml.empty(
        "Default",
        &[("Extension", "xml"), ("ContentType", "application/xml")],
    )?;
    xml.empty(
        "Default",
        &[("Extension", "png"), ("ContentType", "image/png")],
    )?;
    for (part, content_type) in [
        (
            "/word/document.xml",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
        ),
        (
            "/word/styles.xml",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml",
        ),
        (
            "/docProps/core.xml",
            "application/vnd.openxmlformats-package.core-properties+xml",
        ),
        (
            "/docProps/app.xml",
            "application/vnd.openxmlformats-officedocument.extended-properties+xml",
        ),
    ] {
        xml.empty(
            "Override",
            &[("PartName", part), ("ContentType", content_type)],
        )?;
    }
    xml.close("Types")?;
    Ok(xml.finish())
}

fn root_rels_xml() -> Result<Vec<u8>> {
    let mut xml = Xml::new()?;
    xml.open("Relationships", &[("xmlns", NS_PACKAGE_RELS)])?;
    for (id, kind, target) in [
        ("rId1", REL_OFFICE_DOCUMENT, "word/document.xml"),
        ("rId2", REL_CORE, "docProps/core.xml"),
        ("rId3", REL_EXTENDED, "docProps/app.xml"),
    ] {
        xml.empty(
            "Relationship",
            &[("Id", id), ("Type", kind), ("Target", target)],
        )?;
    }
    xml.close("Relationships")?;
    Ok(xml.finish())
}

fn image_relationship_id(media_index: usize) -> String {
    format!("rIdImage{}", media_index)
}

fn document_rels_xml(document: &Document) -> Result<Vec<u8>> {
    let mut xml = Xml::new()?;
    xml.open("Relationships", &[("xmlns", NS_PACKAGE_RELS)])?;
    xml.empty(
        "Relationship",
        &[("Id", "rId1"), ("Type", REL_STYLES), ("Target", "styles.xml")],
    )?;
    for (offset, media) in document.media().iter().enumerate() {
        let id = image_relationship_id(offset + 1);
        let target = format!("media/{}", media.file_name);
        xml.empty(
            "Relationship",
            &[
                ("Id", id.as_str()),
                ("Type", REL_IMAGE),
                ("Target", target.as_str()),
            ],
        )?;
    }
    xml.close("Relationships")?;
    Ok(xml.finish())
}

fn core_xml(created: OffsetDateTime) -> Result<Vec<u8>> {
    let timestamp = created
        .replace_nanosecond(0)
        .unwrap_or(created)
        .format(&Rfc3339)
        .with_context(|| "failed to format document timestamp")?;
    let mut xml = Xml::new()?;
    xml.open(
        "cp:coreProperties",
        &[
            (
                "xmlns:cp",
                "http://schemas.openxmlformats.org/package/2006/metadata/core-properties",
            ),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:dcterms", "http://purl.org/dc/terms/"),
            ("xmlns:dcmitype", "http://purl.org/dc/dcmitype/"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
        ],
    )?;
    xml.leaf("dc:title", &[], super::DOCUMENT_TITLE)?;
    xml.leaf("dc:creator", &[], APPLICATION)?;
    xml.leaf(
        "dcterms:created",
        &[("xsi:type", "dcterms:W3CDTF")],
        &timestamp,
    )?;
    xml.leaf(
        "dcterms:modified",
        &[("xsi:type", "dcterms:W3CDTF")],
        &timestamp,
    )?;
    xml.close("cp:coreProperties")?;
    Ok(xml.finish())
}

fn app_xml() -> Result<Vec<u8>> {
    let mut xml = Xml::new()?;
    xml.open(
        "Properties",
        &[
            (
                "xmlns",
                "http://schemas.openxmlformats.org/officeDocument/2006/extended-properties",
            ),
            (
                "xmlns:vt",
                "http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes",
            ),
        ],
    )?;
    xml.leaf("Application", &[], APPLICATION)?;
    xml.close("Properties")?;
    Ok(xml.finish())
}

fn styles_xml(style: &DocumentStyle) -> Result<Vec<u8>> {
    let font = style.font_family.as_str();
    let body = half_points(style.body_font_size);
    let mut xml = Xml::new()?;
    xml.open("w:styles", &[("xmlns:w", NS_W)])?;

    xml.open("w:docDefaults", &[])?;
    xml.open("w:rPrDefault", &[])?;
    xml.open("w:rPr", &[])?;
    xml.empty(
        "w:rFonts",
        &[
            ("w:ascii", font),
            ("w:hAnsi", font),
            ("w:eastAsia", font),
            ("w:cs", font),
        ],
    )?;
    xml.empty("w:sz", &[("w:val", body.as_str())])?;
    xml.empty("w:szCs", &[("w:val", body.as_str())])?;
    xml.close("w:rPr")?;
    xml.close("w:rPrDefault")?;
    xml.open("w:pPrDefault", &[])?;
    xml.open("w:pPr", &[])?;
    xml.empty(
        "w:spacing",
        &[("w:after", "160"), ("w:line", "259"), ("w:lineRule", "auto")],
    )?;
    xml.close("w:pPr")?;
    xml.close("w:pPrDefault")?;
    xml.close("w:docDefaults")?;

    xml.open(
        "w:style",
        &[
            ("w:type", "paragraph"),
            ("w:default", "1"),
            ("w:styleId", "Normal"),
        ],
    )?;
    xml.empty("w:name", &[("w:val", "Normal")])?;
    xml.empty("w:qFormat", &[])?;
    xml.close("w:style")?;

    for (id, name, level, before, size) in [
        ("Heading1", "heading 1", "0", "480", style.heading_font_size),
        ("Heading2", "heading 2", "1", "200", style.subheading_font_size),
    ] {
        let size = half_points(size);
        xml.open("w:style", &[("w:type", "paragraph"), ("w:styleId", id)])?;
        xml.empty("w:name", &[("w:val", name)])?;
        xml.empty("w:basedOn", &[("w:val", "Normal")])?;
        xml.empty("w:next", &[("w:val", "Normal")])?;
        xml.empty("w:qFormat", &[])?;
        xml.open("w:pPr", &[])?;
        xml.empty("w:keepNext", &[])?;
        xml.empty("w:spacing", &[("w:before", before), ("w:after", "120")])?;
        xml.empty("w:outlineLvl", &[("w:val", level)])?;
        xml.close("w:pPr")?;
        xml.open("w:rPr", &[])?;
        xml.empty("w:b", &[])?;
        xml.empty("w:sz", &[("w:val", size.as_str())])?;
        xml.empty("w:szCs", &[("w:val", size.as_str())])?;
        xml.close("w:rPr")?;
        xml.close("w:style")?;
    }

    xml.close("w:styles")?;
    Ok(xml.finish())
}

struct RunFormat<'a> {
    size: f32,
    bold: bool,
    italic: bool,
    color: Option<&'a str>,
}

fn document_xml(document: &Document) -> Result<Vec<u8>> {
    let style = document.style();
    let mut xml = Xml::new()?;
    xml.open(
        "w:document",
        &[
            ("xmlns:w", NS_W),
            ("xmlns:r", NS_R),
            ("xmlns:wp", NS_WP),
            ("xmlns:a", NS_A),
            ("xmlns:pic", NS_PIC),
        ],
    )?;
    xml.open("w:body", &[])?;

    for block in document.blocks() {
        match block {
            Block::Heading { level, text } => {
                let (style_id, size) = match level {
                    HeadingLevel::Page => ("Heading1", style.heading_font_size),
                    HeadingLevel::Section => ("Heading2", style.subheading_font_size),
                };
                let format = RunFormat {
                    size,
                    bold: true,
                    italic: false,
                    color: Some(BLACK),
                };
                write_text_paragraph(&mut xml, style, Some(style_id), text, &format)?;
            }
            Block::Paragraph { kind, text } => {
                let format = match kind {
                    ParagraphKind::Blank => {
                        xml.empty("w:p", &[])?;
                        continue;
                    }
                    ParagraphKind::Body => RunFormat {
                        size: style.body_font_size,
                        bold: false,
                        italic: false,
                        color: None,
                    },
                    ParagraphKind::Label => RunFormat {
                        size: style.label_font_size,
                        bold: true,
                        italic: false,
                        color: None,
                    },
                    ParagraphKind::Error => RunFormat {
                        size: style.label_font_size,
                        bold: false,
                        italic: true,
                        color: Some(RED),
                    },
                };
                write_text_paragraph(&mut xml, style, None, text, &format)?;
            }
            Block::Image(image) => write_image_paragraph(&mut xml, image)?,
            Block::PageBreak => {
                xml.open("w:p", &[])?;
                xml.open("w:r", &[])?;
                xml.empty("w:br", &[("w:type", "page")])?;
                xml.close("w:r")?;
                xml.close("w:p")?;
            }
        }
    }

    // US Letter, one inch margins.
    xml.open("w:sectPr", &[])?;
    xml.empty("w:pgSz", &[("w:w", "12240"), ("w:h", "15840")])?;
    xml.empty(
        "w:pgMar",
        &[
            ("w:top", "1440"),
            ("w:right", "1440"),
            ("w:bottom", "1440"),
            ("w:left", "1440"),
            ("w:header", "720"),
            ("w:footer", "720"),
            ("w:gutter", "0"),
        ],
    )?;
    xml.close("w:sectPr")?;

    xml.close("w:body")?;
    xml.close("w:document")?;
    Ok(xml.finish())
}

fn write_text_paragraph(
    xml: &mut Xml,
    style: &DocumentStyle,
    style_id: Option<&str>,
    text: &str,
    format: &RunFormat<'_>,
) -> Result<()> {
    let font = style.font_family.as_str();
    let size = half_points(format.size);
    xml.open("w:p", &[])?;
    xml.open("w:pPr", &[])?;
    if let Some(style_id) = style_id {
        xml.empty("w:pStyle", &[("w:val", style_id)])?;
    }
    xml.empty("w:jc", &[("w:val", "left")])?;
    xml.close("w:pPr")?;

    xml.open("w:r", &[])?;
    xml.open("w:rPr", &[])?;
    xml.empty(
        "w:rFonts",
        &[("w:ascii", font), ("w:hAnsi", font), ("w:cs", font)],
    )?;
    if format.bold {
        xml.empty("w:b", &[])?;
    }
    if format.italic {
        xml.empty("w:i", &[])?;
    }
    if let Some(color) = format.color {
        xml.empty("w:color", &[("w:val", color)])?;
    }
    xml.empty("w:sz", &[("w:val", size.as_str())])?;
    xml.empty("w:szCs", &[("w:val", size.as_str())])?;
    xml.close("w:rPr")?;
    xml.leaf("w:t", &[("xml:space", "preserve")], &xml_safe(text))?;
    xml.close("w:r")?;
    xml.close("w:p")
}

fn write_image_paragraph(xml: &mut Xml, image: &EmbeddedImage) -> Result<()> {
    let (cx, cy) = image.size.to_emu();
    let (cx, cy) = (cx.to_string(), cy.to_string());
    let doc_id = image.media_index.to_string();
    let rel_id = image_relationship_id(image.media_index);
    let name = xml_safe(&image.name);

    xml.open("w:p", &[])?;
    xml.open("w:pPr", &[])?;
    xml.empty("w:jc", &[("w:val", "center")])?;
    xml.close("w:pPr")?;
    xml.open("w:r", &[])?;
    xml.open("w:drawing", &[])?;
    xml.open(
        "wp:inline",
        &[("distT", "0"), ("distB", "0"), ("distL", "0"), ("distR", "0")],
    )?;
    xml.empty("wp:extent", &[("cx", cx.as_str()), ("cy", cy.as_str())])?;
    xml.empty(
        "wp:docPr",
        &[("id", doc_id.as_str()), ("name", name.as_str())],
    )?;
    xml.open("wp:cNvGraphicFramePr", &[])?;
    xml.empty("a:graphicFrameLocks", &[("noChangeAspect", "1")])?;
    xml.close("wp:cNvGraphicFramePr")?;
    xml.open("a:graphic", &[])?;
    xml.open("a:graphicData", &[("uri", NS_PIC)])?;
    xml.open("pic:pic", &[])?;

    xml.open("pic:nvPicPr", &[])?;
    xml.empty("pic:cNvPr", &[("id", "0"), ("name", name.as_str())])?;
    xml.empty("pic:cNvPicPr", &[])?;
    xml.close("pic:nvPicPr")?;

    xml.open("pic:blipFill", &[])?;
    xml.empty("a:blip", &[("r:embed", rel_id.as_str())])?;
    xml.open("a:stretch", &[])?;
    xml.empty("a:fillRect", &[])?;
    xml.close("a:stretch")?;
    xml.close("pic:blipFill")?;

    xml.open("pic:spPr", &[])?;
    xml.open("a:xfrm", &[])?;
    xml.empty("a:off", &[("x", "0"), ("y", "0")])?;
    xml.empty("a:ext", &[("cx", cx.as_str()), ("cy", cy.as_str())])?;
    xml.close("a:xfrm")?;
    xml.open("a:prstGeom", &[("prst", "rect")])?;
    xml.empty("a:avLst", &[])?;
    xml.close("a:prstGeom")?;
    xml.close("pic:spPr")?;

    xml.close("pic:pic")?;
    xml.close("a:graphicData")?;
    xml.close("a:graphic")?;
    xml.close("wp:inline")?;
    xml.close("w:drawing")?;
    xml.close("w:r")?;
    xml.close("w:p")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).expect("utf-8 xml")
    }

    #[test]
    fn root_relationships_point_at_the_main_parts() {
        insta::assert_snapshot!(text(root_rels_xml().expect("rels")), @r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/></Relationships>"#);
    }

    #[test]
    fn core_properties_carry_utc_timestamp() {
        let xml = text(core_xml(datetime!(2026-03-01 09:30:15.250 UTC)).expect("core"));
        assert!(xml.contains(
            r#"<dcterms:created xsi:type="dcterms:W3CDTF">2026-03-01T09:30:15Z</dcterms:created>"#
        ));
        assert!(xml.contains("<dc:title>Handwritten Notes</dc:title>"));
    }

    #[test]
    fn text_is_escaped_and_control_characters_dropped() {
        let mut document = Document::new(DocumentStyle::default());
        document.add_paragraph(ParagraphKind::Body, "a < b & \u{0}c\u{7}");
        let xml = text(document_xml(&document).expect("document"));
        assert!(xml.contains(r#"<w:t xml:space="preserve">a &lt; b &amp; c</w:t>"#));
    }

    #[test]
    fn run_formatting_follows_paragraph_kind() {
        let mut document = Document::new(DocumentStyle::default());
        document.add_heading(HeadingLevel::Page, "Page 1: a.png");
        document.add_paragraph(ParagraphKind::Error, "[Error loading diagram: x]");
        let xml = text(document_xml(&document).expect("document"));
        assert!(xml.contains(r#"<w:pStyle w:val="Heading1"/>"#));
        assert!(xml.contains(r#"<w:b/><w:color w:val="000000"/><w:sz w:val="32"/>"#));
        assert!(xml.contains(r#"<w:i/><w:color w:val="FF0000"/><w:sz w:val="22"/>"#));
    }

    #[test]
    fn styles_use_configured_font() {
        let style = DocumentStyle {
            font_family: "Calibri".to_string(),
            ..DocumentStyle::default()
        };
        let xml = text(styles_xml(&style).expect("styles"));
        assert!(xml.contains(r#"w:ascii="Calibri""#));
        assert!(xml.contains(r#"<w:sz w:val="24"/>"#));
        assert!(xml.contains(r#"w:styleId="Heading2""#));
    }
}
