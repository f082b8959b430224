//! Building the UBL document bodies accepted by `sendBill`.
//!
//! The aggregator expects the UBL tree as json where every element is an object with
//! `_text` and optional `_attributes`.

use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{money, DocumentType};

use super::{Credentials, Supplier};

/// Sales tax rate (IGV). Prices of sale items already include it.
pub const IGV_RATE: Decimal = dec!(0.18);

/// Item ids arrive both as numbers and as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum LineId {
    Number(u64),
    Text(String),
}

impl Default for LineId {
    fn default() -> Self {
        LineId::Text(String::new())
    }
}

impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineId::Number(n) => write!(f, "{n}"),
            LineId::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A sold item as sent by the point of sale. `cost` is the unit price including tax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SaleItem {
    #[serde(default)]
    pub id: LineId,
    #[serde(default)]
    pub name: String,
    pub quantity: Decimal,
    pub cost: Decimal,
}

impl SaleItem {
    pub fn line_total(&self) -> Decimal {
        self.cost * self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub igv: Decimal,
    pub total: Decimal,
}

/// Splits the tax inclusive total of `items` into base and tax, rounding only the results.
pub fn totals(items: &[SaleItem]) -> Totals {
    let total: Decimal = items.iter().map(SaleItem::line_total).sum();
    let subtotal = total / (Decimal::ONE + IGV_RATE);
    let igv = subtotal * IGV_RATE;

    Totals {
        subtotal: money(subtotal),
        igv: money(igv),
        total: money(total),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineAmounts {
    /// Base amount of the line without tax.
    pub line_extension: Decimal,
    pub tax: Decimal,
    /// Unit price without tax.
    pub base_cost: Decimal,
}

/// Distributes base and tax over the lines proportionally to their totals.
/// The last line takes the remainder so the lines add up to the document totals.
pub fn line_amounts(items: &[SaleItem]) -> Vec<LineAmounts> {
    let total: Decimal = items.iter().map(SaleItem::line_total).sum();
    let base_total = total / (Decimal::ONE + IGV_RATE);
    let tax_total = base_total * IGV_RATE;

    let mut accumulated_base = Decimal::ZERO;
    let mut accumulated_tax = Decimal::ZERO;
    let mut result = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let (line_extension, tax) = if index + 1 == items.len() {
            (
                money(base_total - accumulated_base),
                money(tax_total - accumulated_tax),
            )
        } else if total.is_zero() {
            (money(Decimal::ZERO), money(Decimal::ZERO))
        } else {
            let proportion = item.line_total() / total;
            (money(base_total * proportion), money(tax_total * proportion))
        };

        accumulated_base += line_extension;
        accumulated_tax += tax;

        let base_cost = if item.quantity > Decimal::ZERO {
            money(line_extension / item.quantity)
        } else {
            money(Decimal::ZERO)
        };

        result.push(LineAmounts {
            line_extension,
            tax,
            base_cost,
        });
    }
    result
}

const UNITS: [&str; 20] = [
    "",
    "UNO",
    "DOS",
    "TRES",
    "CUATRO",
    "CINCO",
    "SEIS",
    "SIETE",
    "OCHO",
    "NUEVE",
    "DIEZ",
    "ONCE",
    "DOCE",
    "TRECE",
    "CATORCE",
    "QUINCE",
    "DIECISÉIS",
    "DIECISIETE",
    "DIECIOCHO",
    "DIECINUEVE",
];

const TENS: [&str; 10] = [
    "",
    "",
    "VEINTE",
    "TREINTA",
    "CUARENTA",
    "CINCUENTA",
    "SESENTA",
    "SETENTA",
    "OCHENTA",
    "NOVENTA",
];

const TWENTIES: [&str; 10] = [
    "VEINTE",
    "VEINTIUNO",
    "VEINTIDÓS",
    "VEINTITRÉS",
    "VEINTICUATRO",
    "VEINTICINCO",
    "VEINTISÉIS",
    "VEINTISIETE",
    "VEINTIOCHO",
    "VEINTINUEVE",
];

const HUNDREDS: [&str; 10] = [
    "",
    "CIENTO",
    "DOSCIENTOS",
    "TRESCIENTOS",
    "CUATROCIENTOS",
    "QUINIENTOS",
    "SEISCIENTOS",
    "SETECIENTOS",
    "OCHOCIENTOS",
    "NOVECIENTOS",
];

fn integer_to_words(number: u64) -> String {
    match number {
        0 => "CERO".to_owned(),
        100 => "CIEN".to_owned(),
        1..=19 => UNITS[number as usize].to_owned(),
        20..=29 => TWENTIES[(number - 20) as usize].to_owned(),
        30..=99 => {
            let tens = TENS[(number / 10) as usize];
            match number % 10 {
                0 => tens.to_owned(),
                unit => format!("{} Y {}", tens, UNITS[unit as usize]),
            }
        }
        101..=999 => {
            let hundreds = HUNDREDS[(number / 100) as usize];
            match number % 100 {
                0 => hundreds.to_owned(),
                rest => format!("{} {}", hundreds, integer_to_words(rest)),
            }
        }
        1000..=999_999 => {
            let thousands = match number / 1000 {
                1 => "MIL".to_owned(),
                n => format!("{} MIL", integer_to_words(n)),
            };
            match number % 1000 {
                0 => thousands,
                rest => format!("{} {}", thousands, integer_to_words(rest)),
            }
        }
        _ => "CANTIDAD MUY ALTA".to_owned(),
    }
}

/// Amount in words as required for the legal note, `CIENTO VEINTITRÉS CON 45/100 SOLES`.
pub fn number_to_words(amount: Decimal) -> String {
    let amount = money(amount.abs());
    let integer = amount.trunc().to_u64().unwrap_or(u64::MAX);
    let cents = ((amount - amount.trunc()) * dec!(100)).to_u64().unwrap_or(0);
    format!("{} CON {:02}/100 SOLES", integer_to_words(integer), cents)
}

/// Buyer of the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Receiver {
    /// Tickets are issued to an unidentified customer.
    Anonymous,
    Company {
        ruc: String,
        razon_social: String,
        address: String,
    },
}

fn text(value: impl Into<Value>) -> Value {
    let value: Value = value.into();
    json!({ "_text": value })
}

fn amount(value: Decimal) -> Value {
    json!({
        "_attributes": { "currencyID": "PEN" },
        "_text": value.to_f64().unwrap_or_default(),
    })
}

fn number(value: Decimal) -> Value {
    value.normalize().to_f64().map(Value::from).unwrap_or(Value::Null)
}

fn tax_scheme() -> Value {
    json!({
        "cbc:ID": text("1000"),
        "cbc:Name": text("IGV"),
        "cbc:TaxTypeCode": text("VAT"),
    })
}

fn invoice_lines(items: &[SaleItem]) -> Vec<Value> {
    items
        .iter()
        .zip(line_amounts(items))
        .map(|(item, line)| {
            json!({
                "cbc:ID": text(item.id.to_string()),
                "cbc:InvoicedQuantity": {
                    "_attributes": { "unitCode": "NIU" },
                    "_text": number(item.quantity),
                },
                "cbc:LineExtensionAmount": amount(line.line_extension),
                "cac:PricingReference": {
                    "cac:AlternativeConditionPrice": {
                        "cbc:PriceAmount": amount(item.cost),
                        "cbc:PriceTypeCode": text("01"),
                    }
                },
                "cac:TaxTotal": {
                    "cbc:TaxAmount": amount(line.tax),
                    "cac:TaxSubtotal": [{
                        "cbc:TaxableAmount": amount(line.line_extension),
                        "cbc:TaxAmount": amount(line.tax),
                        "cac:TaxCategory": {
                            "cbc:Percent": text(18),
                            "cbc:TaxExemptionReasonCode": text("10"),
                            "cac:TaxScheme": tax_scheme(),
                        }
                    }]
                },
                "cac:Item": {
                    "cbc:Description": text(item.name.clone()),
                },
                "cac:Price": {
                    "cbc:PriceAmount": amount(line.base_cost),
                },
            })
        })
        .collect()
}

fn customer_party(receiver: &Receiver) -> Value {
    match receiver {
        Receiver::Anonymous => json!({
            "cac:Party": {
                "cac:PartyIdentification": {
                    "cbc:ID": { "_attributes": { "schemeID": "1" }, "_text": "00000000" },
                },
                "cac:PartyLegalEntity": {
                    "cbc:RegistrationName": text("---"),
                },
            }
        }),
        Receiver::Company {
            ruc,
            razon_social,
            address,
        } => json!({
            "cac:Party": {
                "cac:PartyIdentification": {
                    "cbc:ID": { "_attributes": { "schemeID": "6" }, "_text": ruc },
                },
                "cac:PartyLegalEntity": {
                    "cbc:RegistrationName": text(razon_social.clone()),
                    "cac:RegistrationAddress": {
                        "cac:AddressLine": { "cbc:Line": text(address.clone()) },
                    },
                },
            }
        }),
    }
}

/// File name of a document, `20482674828-03-B001-00000001`.
pub fn file_name(supplier_ruc: &str, document_type: DocumentType, correlative: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        supplier_ruc,
        document_type.code(),
        document_type.serie(),
        correlative
    )
}

/// Complete `sendBill` request for an invoice or a ticket.
pub fn build_document(
    credentials: &Credentials,
    supplier: &Supplier,
    document_type: DocumentType,
    correlative: &str,
    items: &[SaleItem],
    receiver: &Receiver,
    issued_at: NaiveDateTime,
) -> Value {
    let totals = totals(items);

    let mut body = json!({
        "cbc:UBLVersionID": text("2.1"),
        "cbc:CustomizationID": text("2.0"),
        "cbc:ID": text(format!("{}-{}", document_type.serie(), correlative)),
        "cbc:IssueDate": text(issued_at.format("%Y-%m-%d").to_string()),
        "cbc:IssueTime": text(issued_at.format("%H:%M:%S").to_string()),
        "cbc:InvoiceTypeCode": {
            "_attributes": { "listID": "0101" },
            "_text": document_type.code(),
        },
        "cbc:Note": [{
            "_text": number_to_words(totals.total),
            "_attributes": { "languageLocaleID": "1000" },
        }],
        "cbc:DocumentCurrencyCode": text("PEN"),
        "cac:AccountingSupplierParty": {
            "cac:Party": {
                "cac:PartyIdentification": {
                    "cbc:ID": { "_attributes": { "schemeID": "6" }, "_text": supplier.ruc },
                },
                "cac:PartyName": { "cbc:Name": text(supplier.name.clone()) },
                "cac:PartyLegalEntity": {
                    "cbc:RegistrationName": text(supplier.name.clone()),
                    "cac:RegistrationAddress": {
                        "cbc:AddressTypeCode": text("0000"),
                        "cac:AddressLine": { "cbc:Line": text(supplier.address.clone()) },
                    },
                },
            }
        },
        "cac:AccountingCustomerParty": customer_party(receiver),
        "cac:TaxTotal": {
            "cbc:TaxAmount": amount(totals.igv),
            "cac:TaxSubtotal": [{
                "cbc:TaxableAmount": amount(totals.subtotal),
                "cbc:TaxAmount": amount(totals.igv),
                "cac:TaxCategory": { "cac:TaxScheme": tax_scheme() },
            }],
        },
        "cac:LegalMonetaryTotal": {
            "cbc:LineExtensionAmount": amount(totals.subtotal),
            "cbc:TaxInclusiveAmount": amount(totals.total),
            "cbc:PayableAmount": amount(totals.total),
        },
    });

    if let Some(body) = body.as_object_mut() {
        if matches!(receiver, Receiver::Company { .. }) {
            body.insert(
                "cac:PaymentTerms".to_owned(),
                json!([{
                    "cbc:ID": text("FormaPago"),
                    "cbc:PaymentMeansID": text("Contado"),
                }]),
            );
        }
        body.insert(
            "cac:InvoiceLine".to_owned(),
            Value::Array(invoice_lines(items)),
        );
    }

    json!({
        "personaId": credentials.persona_id,
        "personaToken": credentials.persona_token,
        "fileName": file_name(&supplier.ruc, document_type, correlative),
        "documentBody": body,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn item(id: &str, quantity: Decimal, cost: Decimal) -> SaleItem {
        SaleItem {
            id: LineId::Text(id.to_owned()),
            name: format!("Plato {id}"),
            quantity,
            cost,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            persona_id: "persona".to_owned(),
            persona_token: "token".to_owned(),
        }
    }

    fn supplier() -> Supplier {
        Supplier {
            ruc: "20482674828".to_owned(),
            name: "Taypa".to_owned(),
            address: "Avis Luz y Fuerza D-8".to_owned(),
        }
    }

    fn issued_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 13)
            .unwrap()
            .and_hms_opt(10, 30, 48)
            .unwrap()
    }

    #[test]
    fn test_number_to_words() {
        assert_eq!(number_to_words(dec!(0)), "CERO CON 00/100 SOLES");
        assert_eq!(number_to_words(dec!(1)), "UNO CON 00/100 SOLES");
        assert_eq!(number_to_words(dec!(16.5)), "DIECISÉIS CON 50/100 SOLES");
        assert_eq!(number_to_words(dec!(22.10)), "VEINTIDÓS CON 10/100 SOLES");
        assert_eq!(number_to_words(dec!(45)), "CUARENTA Y CINCO CON 00/100 SOLES");
        assert_eq!(number_to_words(dec!(100)), "CIEN CON 00/100 SOLES");
        assert_eq!(
            number_to_words(dec!(123.45)),
            "CIENTO VEINTITRÉS CON 45/100 SOLES"
        );
        assert_eq!(number_to_words(dec!(500)), "QUINIENTOS CON 00/100 SOLES");
        assert_eq!(number_to_words(dec!(1000)), "MIL CON 00/100 SOLES");
        assert_eq!(
            number_to_words(dec!(2150.99)),
            "DOS MIL CIENTO CINCUENTA CON 99/100 SOLES"
        );
        assert_eq!(
            number_to_words(dec!(21021)),
            "VEINTIUNO MIL VEINTIUNO CON 00/100 SOLES"
        );
        assert_eq!(
            number_to_words(dec!(1000000)),
            "CANTIDAD MUY ALTA CON 00/100 SOLES"
        );
    }

    #[test]
    fn test_totals_split_tax() {
        let items = vec![item("1", dec!(2), dec!(50.00))];
        let totals = totals(&items);
        assert_eq!(totals.total, dec!(100.00));
        assert_eq!(totals.subtotal, dec!(84.75));
        assert_eq!(totals.igv, dec!(15.25));
    }

    #[test]
    fn test_line_amounts_add_up() {
        let items = vec![
            item("1", dec!(1), dec!(10.00)),
            item("2", dec!(3), dec!(7.30)),
            item("3", dec!(2), dec!(12.90)),
        ];
        let totals = totals(&items);
        let lines = line_amounts(&items);

        let base: Decimal = lines.iter().map(|l| l.line_extension).sum();
        let tax: Decimal = lines.iter().map(|l| l.tax).sum();
        assert_eq!(base, totals.subtotal);
        assert_eq!(tax, totals.igv);
        assert_eq!(lines[0].line_extension, dec!(8.47));
        assert_eq!(lines[0].base_cost, dec!(8.47));
    }

    #[test]
    fn test_line_amounts_zero_total() {
        let items = vec![item("1", dec!(1), dec!(0)), item("2", dec!(0), dec!(5))];
        let lines = line_amounts(&items);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].base_cost, Decimal::ZERO);
    }

    #[test]
    fn test_build_ticket() {
        let items = vec![item("1", dec!(2), dec!(50.00))];
        let ticket = build_document(
            &credentials(),
            &supplier(),
            DocumentType::Ticket,
            "00000006",
            &items,
            &Receiver::Anonymous,
            issued_at(),
        );

        assert_eq!(ticket["fileName"], "20482674828-03-B001-00000006");
        assert_eq!(ticket["personaId"], "persona");
        let body = &ticket["documentBody"];
        assert_eq!(body["cbc:ID"]["_text"], "B001-00000006");
        assert_eq!(body["cbc:InvoiceTypeCode"]["_text"], "03");
        assert_eq!(body["cbc:IssueDate"]["_text"], "2024-12-13");
        assert_eq!(body["cbc:IssueTime"]["_text"], "10:30:48");
        assert_eq!(body["cbc:Note"][0]["_text"], "CIEN CON 00/100 SOLES");
        assert_eq!(
            body["cac:AccountingCustomerParty"]["cac:Party"]["cac:PartyIdentification"]["cbc:ID"]
                ["_attributes"]["schemeID"],
            "1"
        );
        assert_eq!(body["cac:LegalMonetaryTotal"]["cbc:PayableAmount"]["_text"], 100.0);
        assert_eq!(body["cac:LegalMonetaryTotal"]["cbc:LineExtensionAmount"]["_text"], 84.75);
        assert!(body.get("cac:PaymentTerms").is_none());
        assert_eq!(body["cac:InvoiceLine"].as_array().unwrap().len(), 1);
        assert_eq!(body["cac:InvoiceLine"][0]["cbc:InvoicedQuantity"]["_text"], 2.0);
    }

    #[test]
    fn test_build_invoice() {
        let items = vec![item("1", dec!(1), dec!(118.00))];
        let receiver = Receiver::Company {
            ruc: "20100070970".to_owned(),
            razon_social: "Supermercados Peruanos S.A.".to_owned(),
            address: "Av. Morro Solar 1086".to_owned(),
        };
        let invoice = build_document(
            &credentials(),
            &supplier(),
            DocumentType::Invoice,
            "00000001",
            &items,
            &receiver,
            issued_at(),
        );

        assert_eq!(invoice["fileName"], "20482674828-01-F001-00000001");
        let body = &invoice["documentBody"];
        assert_eq!(body["cbc:ID"]["_text"], "F001-00000001");
        assert_eq!(body["cbc:InvoiceTypeCode"]["_text"], "01");
        let party = &body["cac:AccountingCustomerParty"]["cac:Party"];
        assert_eq!(party["cac:PartyIdentification"]["cbc:ID"]["_text"], "20100070970");
        assert_eq!(party["cac:PartyIdentification"]["cbc:ID"]["_attributes"]["schemeID"], "6");
        assert_eq!(
            party["cac:PartyLegalEntity"]["cac:RegistrationAddress"]["cac:AddressLine"]["cbc:Line"]
                ["_text"],
            "Av. Morro Solar 1086"
        );
        assert_eq!(body["cac:PaymentTerms"][0]["cbc:PaymentMeansID"]["_text"], "Contado");
        assert_eq!(body["cac:TaxTotal"]["cbc:TaxAmount"]["_text"], 18.0);
    }

    #[test]
    fn test_sale_item_accepts_numeric_ids() {
        let item: SaleItem =
            serde_json::from_value(json!({"id": 4, "name": "Chicha", "quantity": 2, "cost": 6.5}))
                .unwrap();
        assert_eq!(item.id.to_string(), "4");
        assert_eq!(item.line_total(), dec!(13.0));
    }
}
