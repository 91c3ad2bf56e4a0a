use std::io::BufWriter;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};

use super::{HistoryRow, InfoColumn, InsightBlock, RenderError, ReportDocument, ReportSection};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN_LEFT: f32 = 20.0;
const TOP: f32 = 280.0;
const BOTTOM: f32 = 18.0;
const LINE: f32 = 4.5;

const COLUMN_WIDTH: f32 = 58.0;
const COLUMN_CHARS: usize = 32;

// History table columns: date, type, notes, pain
const HISTORY_X: [f32; 4] = [20.0, 45.0, 80.0, 172.0];
const NOTES_CHARS: usize = 48;

/// Serialise a report tree to A4 PDF bytes, breaking pages as needed.
pub fn write_pdf(document: &ReportDocument) -> Result<Vec<u8>, RenderError> {
    let mut writer = PageWriter::new(&document.title)?;

    for section in &document.sections {
        match section {
            ReportSection::Header {
                clinic,
                title,
                patient_name,
                patient_code,
                status,
                generated_at,
            } => {
                writer.line(clinic, 9.0, MARGIN_LEFT, false);
                writer.line(title, 16.0, MARGIN_LEFT, true);
                writer.advance(2.0);
                writer.line(patient_name, 13.0, MARGIN_LEFT, true);
                writer.line(
                    &format!("Patient ID: {}   Status: {}", patient_code, status),
                    9.0,
                    MARGIN_LEFT,
                    false,
                );
                writer.line(&format!("Generated {}", generated_at), 7.0, MARGIN_LEFT, false);
                writer.advance(6.0);
            }
            ReportSection::InfoGrid { columns } => write_grid(&mut writer, columns),
            ReportSection::Insights { blocks } => write_insights(&mut writer, blocks),
            ReportSection::RecentTreatment { text } => {
                writer.heading("Recent Treatment");
                for line in wrap_text(text, 90) {
                    writer.line(&line, 9.0, MARGIN_LEFT, false);
                }
                writer.advance(6.0);
            }
            ReportSection::SessionHistory { rows } => write_history(&mut writer, rows),
        }
    }

    writer.finish()
}

fn write_grid(writer: &mut PageWriter, columns: &[InfoColumn]) {
    let height = columns.iter().map(column_height).fold(0.0_f32, f32::max);
    writer.ensure(height);

    let top = writer.y;
    let mut lowest = top;
    for (i, column) in columns.iter().enumerate() {
        let x = MARGIN_LEFT + i as f32 * COLUMN_WIDTH;
        let mut y = top;
        writer.text_at(&column.heading.to_uppercase(), 9.0, x, y, true);
        y -= 6.0;
        for (label, value) in &column.entries {
            writer.text_at(label, 7.0, x, y, true);
            y -= 4.0;
            for line in wrap_text(value, COLUMN_CHARS) {
                writer.text_at(&line, 9.0, x, y, false);
                y -= LINE;
            }
            y -= 2.0;
        }
        lowest = lowest.min(y);
    }
    writer.y = lowest - 4.0;
}

fn column_height(column: &InfoColumn) -> f32 {
    column.entries.iter().fold(6.0, |acc, (_, value)| {
        acc + 6.0 + wrap_text(value, COLUMN_CHARS).len() as f32 * LINE
    })
}

fn write_insights(writer: &mut PageWriter, blocks: &[InsightBlock]) {
    writer.heading("Treatment Insights");
    for block in blocks {
        let detail = wrap_text(&block.detail, 90);
        writer.ensure(10.0 + detail.len() as f32 * LINE);
        writer.line(&block.title, 10.0, MARGIN_LEFT, true);
        writer.line(&block.headline, 9.0, MARGIN_LEFT + 4.0, true);
        for line in detail {
            writer.line(&line, 9.0, MARGIN_LEFT + 4.0, false);
        }
        writer.advance(2.0);
    }
    writer.advance(4.0);
}

fn write_history(writer: &mut PageWriter, rows: &[HistoryRow]) {
    writer.heading("Session History");
    if rows.is_empty() {
        writer.line("No sessions recorded", 9.0, MARGIN_LEFT, false);
        return;
    }

    history_header(writer);
    for row in rows {
        let notes = wrap_text(&row.notes, NOTES_CHARS);
        let height = notes.len() as f32 * LINE + 2.0;
        if writer.ensure(height) {
            history_header(writer);
        }

        let y = writer.y;
        writer.text_at(&row.date, 9.0, HISTORY_X[0], y, false);
        writer.text_at(&row.session_type, 9.0, HISTORY_X[1], y, false);
        writer.text_at(&row.pain_level, 9.0, HISTORY_X[3], y, false);
        for line in notes {
            writer.line(&line, 9.0, HISTORY_X[2], false);
        }
        writer.advance(2.0);
    }
}

fn history_header(writer: &mut PageWriter) {
    let y = writer.y;
    for (label, x) in ["Date", "Type", "Notes", "Pain"].iter().zip(HISTORY_X) {
        writer.text_at(label, 9.0, x, y, true);
    }
    writer.advance(LINE + 1.5);
}

// ============================================================================
// Page cursor
// ============================================================================

struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, RenderError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let layer = doc.get_page(page).get_layer(layer);
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?;

        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: TOP,
            pages: 1,
        })
    }

    /// Start a new page if `height` does not fit. Returns true on a break.
    fn ensure(&mut self, height: f32) -> bool {
        if self.y - height >= BOTTOM {
            return false;
        }
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), format!("Layer {}", self.pages + 1));
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.pages += 1;
        self.y = TOP;
        true
    }

    fn text_at(&self, text: &str, size: f32, x: f32, y: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, Mm(x), Mm(y), font);
    }

    fn line(&mut self, text: &str, size: f32, x: f32, bold: bool) {
        let height = (size * 0.5).max(LINE);
        self.ensure(height);
        self.text_at(text, size, x, self.y, bold);
        self.y -= height;
    }

    fn heading(&mut self, text: &str) {
        self.ensure(16.0);
        self.line(text, 12.0, MARGIN_LEFT, true);
        self.advance(1.5);
    }

    fn advance(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn finish(self) -> Result<Vec<u8>, RenderError> {
        tracing::debug!(pages = self.pages, "Writing PDF");
        let mut buf = BufWriter::new(Vec::new());
        self.doc
            .save(&mut buf)
            .map_err(|e| RenderError::Pdf(format!("save error: {e}")))?;
        buf.into_inner()
            .map_err(|e| RenderError::Pdf(format!("buffer error: {e}")))
    }
}

/// Greedy word wrap on whitespace. Always yields at least one line.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.len() + word.len() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
