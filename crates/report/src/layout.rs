use equipment_contracts::{UploadSummary, format_uploaded_at};

use crate::fonts::{Font, fit_text, text_width};

pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;
pub const MARGIN: i64 = 50;

pub const TITLE: &str = "Chemical Equipment Report";
pub const DISTRIBUTION_HEADING: &str = "Equipment Type Distribution";
pub const TABLE_HEADER: [&str; 2] = ["Equipment Type", "Count"];

pub const TYPE_COLUMN_WIDTH: i64 = 216;
pub const COUNT_COLUMN_WIDTH: i64 = 144;
pub const ROW_HEIGHT: i64 = 25;

const TITLE_SIZE: i64 = 18;
const BODY_SIZE: i64 = 11;
const HEADING_SIZE: i64 = 13;
const LINE_STEP: i64 = 20;
const CELL_PADDING: i64 = 6;
const CELL_BASELINE: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Header,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Text {
        font: Font,
        size: i64,
        x: i64,
        y: i64,
        text: String,
    },
    /// A table row whose lower edge sits at `y`.
    TableRow {
        kind: RowKind,
        y: i64,
        cells: [String; 2],
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageLayout {
    pub elements: Vec<Element>,
}

/// Everything that ends up on paper, positioned in PDF points with the
/// origin at the bottom-left corner. Pure data; encoding happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLayout {
    pub pages: Vec<PageLayout>,
}

impl ReportLayout {
    pub fn from_summary(summary: &UploadSummary) -> Self {
        let stats = &summary.stats;
        let mut first = PageLayout::default();

        let title_width = text_width(Font::Bold, TITLE_SIZE, TITLE);
        first.elements.push(Element::Text {
            font: Font::Bold,
            size: TITLE_SIZE,
            x: (PAGE_WIDTH - title_width) / 2,
            y: PAGE_HEIGHT - MARGIN,
            text: TITLE.to_string(),
        });

        let metadata = [
            format!("Uploaded At: {}", format_uploaded_at(&summary.created_at)),
            format!("Total Equipment: {}", stats.total_equipment),
            format!("Average Flowrate: {:.2}", stats.average_flowrate),
            format!("Average Pressure: {:.2}", stats.average_pressure),
            format!("Average Temperature: {:.2}", stats.average_temperature),
        ];
        let mut y = PAGE_HEIGHT - 2 * MARGIN;
        for (index, line) in metadata.into_iter().enumerate() {
            if index > 0 {
                y -= LINE_STEP;
            }
            first.elements.push(Element::Text {
                font: Font::Regular,
                size: BODY_SIZE,
                x: MARGIN,
                y,
                text: line,
            });
        }

        y -= 2 * LINE_STEP;
        first.elements.push(Element::Text {
            font: Font::Bold,
            size: HEADING_SIZE,
            x: MARGIN,
            y,
            text: DISTRIBUTION_HEADING.to_string(),
        });

        let rows = stats
            .equipment_type_distribution
            .iter()
            .map(|(label, count)| {
                [
                    fit_text(
                        Font::Regular,
                        BODY_SIZE,
                        label,
                        TYPE_COLUMN_WIDTH - 2 * CELL_PADDING,
                    ),
                    count.to_string(),
                ]
            })
            .collect::<Vec<_>>();

        let mut pages = Vec::new();
        let mut page = first;
        let mut table_top = y - 15;
        let mut remaining = rows.as_slice();
        loop {
            let capacity = rows_that_fit(table_top);
            let take = remaining.len().min(capacity.saturating_sub(1));
            let mut row_top = table_top;

            push_row(&mut page, RowKind::Header, &mut row_top, header_cells());
            for cells in &remaining[..take] {
                push_row(&mut page, RowKind::Data, &mut row_top, cells.clone());
            }
            remaining = &remaining[take..];
            pages.push(page);

            if remaining.is_empty() {
                break;
            }
            page = PageLayout::default();
            table_top = PAGE_HEIGHT - MARGIN;
        }

        Self { pages }
    }

    pub fn table_rows(&self) -> impl Iterator<Item = (RowKind, &[String; 2])> {
        self.pages.iter().flat_map(|page| {
            page.elements.iter().filter_map(|element| match element {
                Element::TableRow { kind, cells, .. } => Some((*kind, cells)),
                Element::Text { .. } => None,
            })
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().flat_map(|page| {
            page.elements.iter().filter_map(|element| match element {
                Element::Text { text, .. } => Some(text.as_str()),
                Element::TableRow { .. } => None,
            })
        })
    }
}

fn header_cells() -> [String; 2] {
    [TABLE_HEADER[0].to_string(), TABLE_HEADER[1].to_string()]
}

fn rows_that_fit(table_top: i64) -> usize {
    usize::try_from((table_top - MARGIN) / ROW_HEIGHT).unwrap_or(0)
}

fn push_row(page: &mut PageLayout, kind: RowKind, row_top: &mut i64, cells: [String; 2]) {
    *row_top -= ROW_HEIGHT;
    page.elements.push(Element::TableRow {
        kind,
        y: *row_top,
        cells,
    });
}

pub(crate) struct CellText {
    pub font: Font,
    pub size: i64,
    pub x: i64,
    pub y: i64,
}

/// Text placement for each cell of a row whose lower edge is `row_y`.
/// Labels are left aligned, counts centred.
pub(crate) fn cell_placements(kind: RowKind, row_y: i64, cells: &[String; 2]) -> [CellText; 2] {
    let font = match kind {
        RowKind::Header => Font::Bold,
        RowKind::Data => Font::Regular,
    };
    let baseline = row_y + CELL_BASELINE;
    let count_width = text_width(font, BODY_SIZE, &cells[1]);
    [
        CellText {
            font,
            size: BODY_SIZE,
            x: MARGIN + CELL_PADDING,
            y: baseline,
        },
        CellText {
            font,
            size: BODY_SIZE,
            x: MARGIN + TYPE_COLUMN_WIDTH + (COUNT_COLUMN_WIDTH - count_width) / 2,
            y: baseline,
        },
    ]
}
