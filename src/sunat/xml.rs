//! Reading the UBL 2.1 XML of issued documents.
//!
//! The aggregator hands out the signed XML zipped. These helpers unpack it and pull out
//! the few values needed to reconcile local documents and to re-render them as pdf.

use std::io::{Cursor, Read};
use std::str::FromStr;

use log::warn;
use roxmltree::Node;
use rust_decimal::Decimal;

use super::ubl::{LineId, SaleItem};

const CAC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
const CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("Zip archive is empty")]
    EmptyArchive,
    #[error("No XML file found in zip archive. Files: {}", .0.join(", "))]
    NoXmlEntry(Vec<String>),
    #[error("Invalid zip file or XML format: {0}")]
    InvalidArchive(String),
}

/// Customer block of an invoice.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct CustomerInfo {
    pub ruc: Option<String>,
    pub razon_social: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Copy)]
struct Tag {
    namespace: Option<&'static str>,
    name: &'static str,
}

const fn cac(name: &'static str) -> Tag {
    Tag {
        namespace: Some(CAC),
        name,
    }
}

const fn cbc(name: &'static str) -> Tag {
    Tag {
        namespace: Some(CBC),
        name,
    }
}

const fn plain(name: &'static str) -> Tag {
    Tag {
        namespace: None,
        name,
    }
}

fn is_tag(node: &Node, tag: Tag) -> bool {
    node.is_element()
        && node.tag_name().name() == tag.name
        && node.tag_name().namespace() == tag.namespace
}

fn child_path<'a, 'input>(node: Node<'a, 'input>, path: &[Tag]) -> Option<Node<'a, 'input>> {
    let Some((first, rest)) = path.split_first() else {
        return Some(node);
    };
    node.children()
        .filter(|child| is_tag(child, *first))
        .find_map(|child| child_path(child, rest))
}

/// First descendant of `node` matching `path`, where the first tag may be at any depth
/// and every following tag is a direct child of the previous one.
fn find<'a, 'input>(node: Node<'a, 'input>, path: &[Tag]) -> Option<Node<'a, 'input>> {
    let (first, rest) = path.split_first()?;
    node.descendants()
        .skip(1)
        .filter(|d| is_tag(d, *first))
        .find_map(|d| child_path(d, rest))
}

fn find_text<'a>(node: Node<'a, '_>, path: &[Tag]) -> Option<&'a str> {
    find(node, path)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn find_decimal(node: Node, path: &[Tag]) -> Option<Decimal> {
    find_text(node, path).and_then(|t| Decimal::from_str(t).ok())
}

fn parse(xml: &str) -> Option<roxmltree::Document> {
    match roxmltree::Document::parse(xml) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("Could not parse document xml: {}", e);
            None
        }
    }
}

/// Unpacks the xml of a downloaded document.
///
/// Bodies that are neither declared nor named as zip are first tried as plain xml.
pub fn extract_xml(body: &[u8], content_type: &str, url: &str) -> Result<String, XmlError> {
    let is_zip = content_type.to_lowercase().contains("zip") || url.ends_with(".zip");
    if !is_zip {
        if let Some(xml) = plain_xml(body) {
            return Ok(xml);
        }
    }

    let mut archive = match zip::ZipArchive::new(Cursor::new(body)) {
        Ok(archive) => archive,
        Err(e) => {
            return plain_xml(body).ok_or_else(|| XmlError::InvalidArchive(e.to_string()));
        }
    };

    if archive.is_empty() {
        return Err(XmlError::EmptyArchive);
    }

    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    let Some(xml_name) = names
        .iter()
        .find(|n| n.to_lowercase().ends_with(".xml"))
        .cloned()
    else {
        return Err(XmlError::NoXmlEntry(names));
    };

    let mut entry = archive
        .by_name(&xml_name)
        .map_err(|e| XmlError::InvalidArchive(e.to_string()))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| XmlError::InvalidArchive(e.to_string()))?;
    Ok(content)
}

fn plain_xml(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    roxmltree::Document::parse(text).ok()?;
    Some(text.to_owned())
}

/// Total of the document: tax inclusive amount, falling back to the payable amount.
pub fn parse_amount(xml: &str) -> Option<Decimal> {
    let document = parse(xml)?;
    let root = document.root_element();

    find_decimal(root, &[cac("LegalMonetaryTotal"), cbc("TaxInclusiveAmount")])
        .or_else(|| find_decimal(root, &[cac("LegalMonetaryTotal"), cbc("PayableAmount")]))
        .or_else(|| find_decimal(root, &[plain("TaxInclusiveAmount")]))
        .or_else(|| find_decimal(root, &[plain("PayableAmount")]))
}

/// Serie and number from the document id, `B001-00000001` gives `("B001", "00000001")`.
pub fn parse_serie_numero(xml: &str) -> Option<(String, String)> {
    let document = parse(xml)?;
    let root = document.root_element();

    [cbc("ID"), plain("ID")].into_iter().find_map(|tag| {
        let id = find_text(root, &[tag])?;
        let (serie, numero) = id.split_once('-')?;
        Some((serie.to_owned(), numero.to_owned()))
    })
}

/// Lines of the document as sale items. Quantity defaults to one and the unit cost
/// falls back to the line amount divided by the quantity.
pub fn parse_invoice_lines(xml: &str) -> Vec<SaleItem> {
    let Some(document) = parse(xml) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for line in document
        .root_element()
        .descendants()
        .filter(|n| is_tag(n, cac("InvoiceLine")))
    {
        let quantity = find_decimal(line, &[cbc("InvoicedQuantity")]).unwrap_or(Decimal::ONE);
        let name = find_text(line, &[cbc("Description")])
            .unwrap_or("Item")
            .to_owned();

        let cost = match find_decimal(line, &[cac("Price"), cbc("PriceAmount")]) {
            Some(price) => price,
            None => match find_decimal(line, &[cbc("LineExtensionAmount")]) {
                Some(amount) if quantity > Decimal::ZERO => amount / quantity,
                _ => Decimal::ZERO,
            },
        };

        items.push(SaleItem {
            id: LineId::Text((items.len() + 1).to_string()),
            name,
            quantity,
            cost,
        });
    }
    items
}

pub fn parse_customer_info(xml: &str) -> CustomerInfo {
    let mut info = CustomerInfo::default();
    let Some(document) = parse(xml) else {
        return info;
    };

    if let Some(party) = find(
        document.root_element(),
        &[cac("AccountingCustomerParty"), cac("Party")],
    ) {
        info.ruc = find_text(party, &[cac("PartyIdentification"), cbc("ID")]).map(str::to_owned);
        info.razon_social = find_text(
            party,
            &[cac("PartyLegalEntity"), cbc("RegistrationName")],
        )
        .map(str::to_owned);
        info.address = find_text(
            party,
            &[
                cac("PartyLegalEntity"),
                cac("RegistrationAddress"),
                cac("AddressLine"),
                cbc("Line"),
            ],
        )
        .map(str::to_owned);
    }
    info
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use rust_decimal_macros::dec;

    use super::*;

    pub const INVOICE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2"
         xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2"
         xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:UBLVersionID>2.1</cbc:UBLVersionID>
  <cbc:ID>F001-00000042</cbc:ID>
  <cac:AccountingCustomerParty>
    <cac:Party>
      <cac:PartyIdentification><cbc:ID schemeID="6">20100070970</cbc:ID></cac:PartyIdentification>
      <cac:PartyLegalEntity>
        <cbc:RegistrationName> Supermercados Peruanos S.A. </cbc:RegistrationName>
        <cac:RegistrationAddress>
          <cac:AddressLine><cbc:Line>Av. Morro Solar 1086</cbc:Line></cac:AddressLine>
        </cac:RegistrationAddress>
      </cac:PartyLegalEntity>
    </cac:Party>
  </cac:AccountingCustomerParty>
  <cac:LegalMonetaryTotal>
    <cbc:LineExtensionAmount currencyID="PEN">100.00</cbc:LineExtensionAmount>
    <cbc:TaxInclusiveAmount currencyID="PEN">118.00</cbc:TaxInclusiveAmount>
    <cbc:PayableAmount currencyID="PEN">118.00</cbc:PayableAmount>
  </cac:LegalMonetaryTotal>
  <cac:InvoiceLine>
    <cbc:ID>1</cbc:ID>
    <cbc:InvoicedQuantity unitCode="NIU">2</cbc:InvoicedQuantity>
    <cbc:LineExtensionAmount currencyID="PEN">50.00</cbc:LineExtensionAmount>
    <cac:Item><cbc:Description>Ceviche clasico</cbc:Description></cac:Item>
    <cac:Price><cbc:PriceAmount currencyID="PEN">25.00</cbc:PriceAmount></cac:Price>
  </cac:InvoiceLine>
  <cac:InvoiceLine>
    <cbc:ID>2</cbc:ID>
    <cbc:LineExtensionAmount currencyID="PEN">50.00</cbc:LineExtensionAmount>
    <cac:Item></cac:Item>
  </cac:InvoiceLine>
</Invoice>"#;

    pub fn zipped(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(INVOICE_XML), Some(dec!(118.00)));

        let payable_only = r#"<Invoice xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
            <cac:LegalMonetaryTotal><cbc:PayableAmount>59.00</cbc:PayableAmount></cac:LegalMonetaryTotal>
        </Invoice>"#;
        assert_eq!(parse_amount(payable_only), Some(dec!(59.00)));

        let without_namespace = "<Invoice><Total><TaxInclusiveAmount>12.50</TaxInclusiveAmount></Total></Invoice>";
        assert_eq!(parse_amount(without_namespace), Some(dec!(12.50)));

        assert_eq!(parse_amount("<Invoice/>"), None);
        assert_eq!(parse_amount("not xml"), None);
    }

    #[test]
    fn test_parse_serie_numero() {
        assert_eq!(
            parse_serie_numero(INVOICE_XML),
            Some(("F001".to_owned(), "00000042".to_owned()))
        );
        assert_eq!(parse_serie_numero("<Invoice><ID>B001-7</ID></Invoice>"), Some(("B001".to_owned(), "7".to_owned())));
        assert_eq!(parse_serie_numero("<Invoice><ID>7</ID></Invoice>"), None);
    }

    #[test]
    fn test_parse_invoice_lines() {
        let lines = parse_invoice_lines(INVOICE_XML);
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0].name, "Ceviche clasico");
        assert_eq!(lines[0].quantity, dec!(2));
        assert_eq!(lines[0].cost, dec!(25.00));

        assert_eq!(lines[1].id, LineId::Text("2".to_owned()));
        assert_eq!(lines[1].name, "Item");
        assert_eq!(lines[1].quantity, Decimal::ONE);
        assert_eq!(lines[1].cost, dec!(50.00));

        assert!(parse_invoice_lines("<broken").is_empty());
    }

    #[test]
    fn test_parse_customer_info() {
        let info = parse_customer_info(INVOICE_XML);
        assert_eq!(info.ruc.as_deref(), Some("20100070970"));
        assert_eq!(
            info.razon_social.as_deref(),
            Some("Supermercados Peruanos S.A.")
        );
        assert_eq!(info.address.as_deref(), Some("Av. Morro Solar 1086"));

        assert_eq!(parse_customer_info("<Invoice/>"), CustomerInfo::default());
    }

    #[test]
    fn test_extract_xml_from_zip() {
        let body = zipped(&[("R-20482674828.txt", "x"), ("20482674828-03-B001-1.XML", INVOICE_XML)]);
        let xml = extract_xml(&body, "application/zip", "https://cdn.example/doc").unwrap();
        assert_eq!(xml, INVOICE_XML);

        // detected by url suffix
        let xml = extract_xml(&body, "application/octet-stream", "https://cdn.example/doc.zip").unwrap();
        assert_eq!(xml, INVOICE_XML);
    }

    #[test]
    fn test_extract_plain_xml() {
        let xml = extract_xml(INVOICE_XML.as_bytes(), "text/xml", "https://cdn.example/doc.xml").unwrap();
        assert_eq!(xml, INVOICE_XML);
    }

    #[test]
    fn test_extract_xml_errors() {
        let body = zipped(&[("readme.txt", "nothing here")]);
        let err = extract_xml(&body, "application/zip", "x").unwrap_err();
        assert_eq!(
            err.to_string(),
            "No XML file found in zip archive. Files: readme.txt"
        );

        let body = zipped(&[]);
        let err = extract_xml(&body, "application/zip", "x").unwrap_err();
        assert!(matches!(err, XmlError::EmptyArchive));

        let err = extract_xml(b"garbage", "application/zip", "x").unwrap_err();
        assert!(err.to_string().starts_with("Invalid zip file or XML format"));
    }
}
