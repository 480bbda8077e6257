use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::ReportError;
use crate::fonts::{Font, encode_win_ansi};
use crate::layout::{
    COUNT_COLUMN_WIDTH, Element, MARGIN, PAGE_HEIGHT, PAGE_WIDTH, PageLayout, ROW_HEIGHT,
    ReportLayout, RowKind, TYPE_COLUMN_WIDTH, cell_placements,
};

fn int(value: i64) -> Object {
    Object::Integer(value)
}

fn font_dictionary(font: Font) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => font.base_font(),
        "Encoding" => "WinAnsiEncoding",
    }
}

fn push_text(ops: &mut Vec<Operation>, font: Font, size: i64, x: i64, y: i64, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(font.resource_name().to_vec()), int(size)],
    ));
    ops.push(Operation::new("Td", vec![int(x), int(y)]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(encode_win_ansi(text))],
    ));
    ops.push(Operation::new("ET", vec![]));
}

fn push_row(ops: &mut Vec<Operation>, kind: RowKind, y: i64, cells: &[String; 2]) {
    let columns = [
        (MARGIN, TYPE_COLUMN_WIDTH),
        (MARGIN + TYPE_COLUMN_WIDTH, COUNT_COLUMN_WIDTH),
    ];

    if kind == RowKind::Header {
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("g", vec![Object::Real(0.83)]));
        ops.push(Operation::new(
            "re",
            vec![
                int(MARGIN),
                int(y),
                int(TYPE_COLUMN_WIDTH + COUNT_COLUMN_WIDTH),
                int(ROW_HEIGHT),
            ],
        ));
        ops.push(Operation::new("f", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("w", vec![int(1)]));
    for (x, width) in columns {
        ops.push(Operation::new(
            "re",
            vec![int(x), int(y), int(width), int(ROW_HEIGHT)],
        ));
    }
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));

    for (placement, text) in cell_placements(kind, y, cells).iter().zip(cells) {
        push_text(
            ops,
            placement.font,
            placement.size,
            placement.x,
            placement.y,
            text,
        );
    }
}

fn page_content(page: &PageLayout) -> Content {
    let mut operations = Vec::new();
    for element in &page.elements {
        match element {
            Element::Text {
                font,
                size,
                x,
                y,
                text,
            } => push_text(&mut operations, *font, *size, *x, *y, text),
            Element::TableRow { kind, y, cells } => push_row(&mut operations, *kind, *y, cells),
        }
    }
    Content { operations }
}

/// Serialise a laid out report. No timestamps or random identifiers are
/// written, so equal layouts produce equal bytes.
pub fn encode(layout: &ReportLayout) -> Result<Vec<u8>, ReportError> {
    let mut doc = Document::with_version("1.4");
    let pages_id: ObjectId = doc.new_object_id();

    let regular_id = doc.add_object(font_dictionary(Font::Regular));
    let bold_id = doc.add_object(font_dictionary(Font::Bold));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let mut kids = Vec::with_capacity(layout.pages.len());
    for page in &layout.pages {
        let content = page_content(page)
            .encode()
            .map_err(|err| ReportError::Encode(err.to_string()))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let page_count = i64::try_from(kids.len())
        .map_err(|_| ReportError::Encode("too many pages".to_string()))?;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => int(page_count),
        "Resources" => resources_id,
        "MediaBox" => vec![int(0), int(0), int(PAGE_WIDTH), int(PAGE_HEIGHT)],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| ReportError::Encode(err.to_string()))?;
    Ok(bytes)
}
