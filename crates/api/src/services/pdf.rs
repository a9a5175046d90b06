//! Minimal streaming PDF writer for property exports.
//!
//! Emits an uncompressed PDF 1.4 document on US Letter pages using the
//! built-in Helvetica font. Finished pages are handed back to the caller
//! as soon as they are full; only the page being laid out is kept in memory.
//! Object and cross-reference offsets are tracked as bytes are emitted.

use domain::models::PropertyRecord;

use super::artifact::{format_amount, ArtifactError, RecordRenderer};

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const TITLE_SIZE: f32 = 18.0;
const TITLE_ADVANCE: f32 = 28.0;
const BODY_SIZE: f32 = 12.0;
const LINE_HEIGHT: f32 = 14.0;
/// "Property #n" plus six field lines.
const BLOCK_LINES: usize = 7;
/// Block lines plus one blank line of spacing.
const BLOCK_ADVANCE: f32 = LINE_HEIGHT * (BLOCK_LINES as f32 + 1.0);

pub const TITLE: &str = "Property Export";

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const FONT_ID: usize = 3;

/// Renders a title followed by one block per record.
pub struct PdfRenderer {
    /// Byte offset of each object, indexed by object number - 1.
    offsets: Vec<Option<u64>>,
    written: u64,
    page_ids: Vec<usize>,
    content: String,
    cursor_y: f32,
    record_count: usize,
}

impl PdfRenderer {
    pub fn new() -> Self {
        Self {
            offsets: vec![None; FONT_ID],
            written: 0,
            page_ids: Vec::new(),
            content: String::new(),
            cursor_y: PAGE_HEIGHT - MARGIN,
            record_count: 0,
        }
    }

    fn emit(&mut self, out: &mut Vec<u8>, bytes: &[u8]) {
        out.extend_from_slice(bytes);
        self.written += bytes.len() as u64;
    }

    fn allocate_id(&mut self) -> usize {
        self.offsets.push(None);
        self.offsets.len()
    }

    fn write_object(&mut self, out: &mut Vec<u8>, id: usize, body: &str) {
        self.offsets[id - 1] = Some(self.written);
        self.emit(out, format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
    }

    /// Write the page being laid out, if it has any content.
    fn flush_page(&mut self, out: &mut Vec<u8>) {
        if self.content.is_empty() {
            return;
        }

        let content = std::mem::take(&mut self.content);
        let content_id = self.allocate_id();
        let stream = format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        );
        self.write_object(out, content_id, &stream);

        let page_id = self.allocate_id();
        let page = format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>",
            PAGES_ID, PAGE_WIDTH, PAGE_HEIGHT, FONT_ID, content_id
        );
        self.write_object(out, page_id, &page);
        self.page_ids.push(page_id);
        self.cursor_y = PAGE_HEIGHT - MARGIN;
    }

    fn text(&mut self, x: f32, y: f32, size: f32, text: &str) {
        self.content.push_str(&format!(
            "BT /F1 {} Tf {:.2} {:.2} Td ({}) Tj ET\n",
            size,
            x,
            y,
            escape_text(text)
        ));
    }

    fn fits_block(&self) -> bool {
        self.cursor_y - LINE_HEIGHT * (BLOCK_LINES as f32 - 1.0) >= MARGIN
    }
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordRenderer for PdfRenderer {
    fn begin(&mut self) -> Result<Vec<u8>, ArtifactError> {
        let mut out = Vec::new();
        self.emit(&mut out, b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        self.write_object(
            &mut out,
            CATALOG_ID,
            &format!("<< /Type /Catalog /Pages {} 0 R >>", PAGES_ID),
        );
        self.write_object(
            &mut out,
            FONT_ID,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
        );

        // Helvetica averages about half an em per glyph; close enough to center.
        let title_width = TITLE.len() as f32 * TITLE_SIZE * 0.5;
        let y = self.cursor_y;
        self.text((PAGE_WIDTH - title_width) / 2.0, y, TITLE_SIZE, TITLE);
        self.cursor_y -= TITLE_ADVANCE;

        Ok(out)
    }

    fn render(&mut self, record: &PropertyRecord) -> Result<Vec<u8>, ArtifactError> {
        let mut out = Vec::new();
        if !self.fits_block() {
            self.flush_page(&mut out);
        }

        self.record_count += 1;
        let lines = [
            format!("Property #{}", self.record_count),
            format!("Address: {}", record.street),
            format!("Country: {}", record.country),
            format!("Purchase Price: {}", format_amount(record.purchase_price)),
            format!(
                "Current Value: {}",
                record.current_value.map(format_amount).unwrap_or_default()
            ),
            format!("Status: {}", record.status),
            format!(
                "Property Type: {}",
                record.property_type.as_deref().unwrap_or_default()
            ),
        ];

        let mut y = self.cursor_y;
        for line in &lines {
            self.text(MARGIN, y, BODY_SIZE, line);
            y -= LINE_HEIGHT;
        }
        self.cursor_y -= BLOCK_ADVANCE;

        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>, ArtifactError> {
        let mut out = Vec::new();
        self.flush_page(&mut out);

        let kids = self
            .page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" ");
        let pages = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids,
            self.page_ids.len()
        );
        self.write_object(&mut out, PAGES_ID, &pages);

        let xref_offset = self.written;
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", self.offsets.len() + 1);
        for (index, offset) in self.offsets.iter().enumerate() {
            let offset = offset.ok_or_else(|| {
                ArtifactError::Render(format!("PDF object {} was never written", index + 1))
            })?;
            xref.push_str(&format!("{:010} 00000 n \n", offset));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            self.offsets.len() + 1,
            CATALOG_ID,
            xref_offset
        ));
        self.emit(&mut out, xref.as_bytes());

        Ok(out)
    }
}

/// Escape a string for a PDF literal. Characters outside printable ASCII are
/// replaced, since the standard font encoding cannot represent them reliably.
fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                escaped.push('\\');
                escaped.push(c);
            }
            ' '..='~' => escaped.push(c),
            c if c.is_whitespace() => escaped.push(' '),
            _ => escaped.push('?'),
        }
    }
    escaped
}
