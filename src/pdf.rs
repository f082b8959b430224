//! Receipts for 80 mm thermal printers.

use chrono::NaiveDateTime;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};
use rust_decimal::Decimal;

use crate::error::{ServiceError, ServiceResult};
use crate::models::money;
use crate::sunat::ubl::{totals, SaleItem};
use crate::sunat::Supplier;

const PAGE_WIDTH: f32 = 80.0;
const MARGIN: f32 = 4.0;
const MAX_NAME_LENGTH: usize = 30;
const SEPARATOR_WIDTH: usize = 42;
const PT_TO_MM: f32 = 0.3528;

/// Content of a receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub order_number: Option<String>,
    pub customer_name: Option<String>,
    pub items: Vec<SaleItem>,
    pub issued_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Face {
    Regular,
    Bold,
    Mono,
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    text: String,
    size: f32,
    face: Face,
    align: Align,
    /// Whether the next row starts on a new line.
    advance: bool,
    gap_after: f32,
}

impl Row {
    fn new(text: impl Into<String>, size: f32, face: Face, align: Align) -> Self {
        Self {
            text: text.into(),
            size,
            face,
            align,
            advance: true,
            gap_after: 0.0,
        }
    }

    /// Shares the line with the following row.
    fn inline(mut self) -> Self {
        self.advance = false;
        self
    }

    fn gap(mut self, gap: f32) -> Self {
        self.gap_after = gap;
        self
    }

    fn height(&self) -> f32 {
        if self.advance {
            (self.size + 3.0) * PT_TO_MM + self.gap_after
        } else {
            0.0
        }
    }

    /// Rough width of the text, exact for the monospaced face.
    fn width(&self) -> f32 {
        let em = match self.face {
            Face::Mono => 0.6,
            Face::Regular => 0.5,
            Face::Bold => 0.55,
        };
        self.text.chars().count() as f32 * self.size * em * PT_TO_MM
    }
}

fn separator() -> Row {
    Row::new("-".repeat(SEPARATOR_WIDTH), 8.0, Face::Mono, Align::Center).gap(1.0)
}

fn soles(amount: Decimal) -> String {
    format!("S/ {}", money(amount))
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() > MAX_NAME_LENGTH {
        let short: String = name.chars().take(MAX_NAME_LENGTH - 3).collect();
        format!("{short}...")
    } else {
        name.to_owned()
    }
}

fn layout(supplier: &Supplier, ticket: &Ticket) -> Vec<Row> {
    let totals = totals(&ticket.items);
    let mut rows = vec![
        Row::new(&supplier.name, 16.0, Face::Bold, Align::Center),
        Row::new(&supplier.address, 10.0, Face::Regular, Align::Center),
        Row::new(format!("RUC: {}", supplier.ruc), 9.0, Face::Regular, Align::Center),
        separator(),
    ];

    if let Some(order_number) = &ticket.order_number {
        rows.push(Row::new(
            format!("Orden: {order_number}"),
            10.0,
            Face::Bold,
            Align::Left,
        ));
    }
    if let Some(customer_name) = &ticket.customer_name {
        rows.push(Row::new(
            format!("Cliente: {customer_name}"),
            10.0,
            Face::Regular,
            Align::Left,
        ));
    }
    rows.push(Row::new(
        format!("Fecha: {}", ticket.issued_at.format("%d/%m/%Y %H:%M:%S")),
        9.0,
        Face::Regular,
        Align::Left,
    ));
    rows.push(separator());

    rows.push(Row::new("DESCRIPCIÓN", 9.0, Face::Bold, Align::Left).inline());
    rows.push(Row::new("TOTAL", 9.0, Face::Bold, Align::Right));
    rows.push(separator());

    for item in &ticket.items {
        rows.push(Row::new(truncate_name(&item.name), 9.0, Face::Regular, Align::Left));
        rows.push(
            Row::new(
                format!("{} x {}", money(item.quantity), money(item.cost)),
                8.0,
                Face::Mono,
                Align::Left,
            )
            .inline(),
        );
        rows.push(Row::new(soles(item.line_total()), 9.0, Face::Mono, Align::Right).gap(1.0));
    }

    rows.push(separator());
    rows.push(Row::new("SUBTOTAL", 10.0, Face::Bold, Align::Left).inline());
    rows.push(Row::new(soles(totals.subtotal), 10.0, Face::Mono, Align::Right));
    rows.push(Row::new("IGV (18%)", 10.0, Face::Bold, Align::Left).inline());
    rows.push(Row::new(soles(totals.igv), 10.0, Face::Mono, Align::Right));
    rows.push(separator());
    rows.push(Row::new("TOTAL", 12.0, Face::Bold, Align::Left).inline());
    rows.push(Row::new(soles(totals.total), 12.0, Face::Mono, Align::Right));
    rows.push(separator().gap(3.0));
    rows.push(Row::new("¡Gracias por su compra!", 10.0, Face::Regular, Align::Center).gap(1.5));
    rows.push(Row::new("Vuelva pronto", 9.0, Face::Regular, Align::Center));

    rows
}

fn pdf_error(e: printpdf::Error) -> ServiceError {
    ServiceError::InternalServerError(format!("Could not render pdf: {e}"))
}

/// Renders the receipt as a single page whose height fits the content.
pub fn render_ticket(supplier: &Supplier, ticket: &Ticket) -> ServiceResult<Vec<u8>> {
    let rows = layout(supplier, ticket);
    let height = rows.iter().map(Row::height).sum::<f32>() + 2.0 * MARGIN + 6.0;

    let title = match &ticket.order_number {
        Some(order_number) => format!("Ticket {order_number}"),
        None => "Ticket".to_owned(),
    };
    let (document, page, layer) =
        PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(height), "Layer 1");
    let layer = document.get_page(page).get_layer(layer);

    let regular = document
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = document
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;
    let mono = document
        .add_builtin_font(BuiltinFont::Courier)
        .map_err(pdf_error)?;

    let mut y = height - MARGIN - 16.0 * PT_TO_MM;
    for row in &rows {
        let x = match row.align {
            Align::Left => MARGIN,
            Align::Center => ((PAGE_WIDTH - row.width()) / 2.0).max(0.0),
            Align::Right => (PAGE_WIDTH - MARGIN - row.width()).max(MARGIN),
        };
        let font: &IndirectFontRef = match row.face {
            Face::Regular => &regular,
            Face::Bold => &bold,
            Face::Mono => &mono,
        };
        layer.use_text(row.text.as_str(), row.size, Mm(x), Mm(y), font);
        y -= row.height();
    }

    document.save_to_bytes().map_err(pdf_error)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::sunat::ubl::LineId;

    fn supplier() -> Supplier {
        Supplier {
            ruc: "20482674828".to_owned(),
            name: "Taypa".to_owned(),
            address: "Avis Luz y Fuerza D-8".to_owned(),
        }
    }

    fn ticket(items: Vec<SaleItem>) -> Ticket {
        Ticket {
            order_number: Some("20240131-3".to_owned()),
            customer_name: Some("Ana Quispe".to_owned()),
            items,
            issued_at: NaiveDate::from_ymd_opt(2024, 1, 31)
                .unwrap()
                .and_hms_opt(13, 5, 0)
                .unwrap(),
        }
    }

    fn item(name: &str, quantity: Decimal, cost: Decimal) -> SaleItem {
        SaleItem {
            id: LineId::Number(1),
            name: name.to_owned(),
            quantity,
            cost,
        }
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("Ceviche"), "Ceviche");
        let long = "Chicharrón de pescado con yuca y sarsa criolla";
        let short = truncate_name(long);
        assert_eq!(short.chars().count(), 30);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_layout_contains_totals() {
        let rows = layout(
            &supplier(),
            &ticket(vec![item("Lomo saltado", dec!(2), dec!(29.50))]),
        );
        let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();

        assert!(texts.contains(&"Orden: 20240131-3"));
        assert!(texts.contains(&"Cliente: Ana Quispe"));
        assert!(texts.contains(&"Fecha: 31/01/2024 13:05:00"));
        assert!(texts.contains(&"2.00 x 29.50"));
        assert!(texts.contains(&"S/ 59.00"));
        assert!(texts.contains(&"S/ 50.00"));
        assert!(texts.contains(&"S/ 9.00"));
    }

    #[test]
    fn test_height_grows_with_items() {
        let one = layout(&supplier(), &ticket(vec![item("A", dec!(1), dec!(1))]));
        let three = layout(
            &supplier(),
            &ticket(vec![
                item("A", dec!(1), dec!(1)),
                item("B", dec!(1), dec!(1)),
                item("C", dec!(1), dec!(1)),
            ]),
        );
        let height = |rows: &[Row]| rows.iter().map(Row::height).sum::<f32>();
        assert!(height(&three) > height(&one));
    }

    #[test]
    fn test_render_ticket() {
        let bytes = render_ticket(
            &supplier(),
            &ticket(vec![item("Ceviche", dec!(1), dec!(35))]),
        )
        .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
