//! Command encoding tests

use indi_core::{BlobMode, IndiElement, SwitchState, Tag, VectorKind};

fn encoded(element: &IndiElement) -> String {
    String::from_utf8(element.encode_line().to_vec()).expect("invalid utf-8")
}

#[test]
fn test_get_properties_all() {
    assert_eq!(
        encoded(&IndiElement::get_properties(None, None)),
        "<getProperties version=\"1.7\"/>\n"
    );
}

#[test]
fn test_get_properties_scoped() {
    assert_eq!(
        encoded(&IndiElement::get_properties(Some("CCD Simulator"), Some("CCD_EXPOSURE"))),
        "<getProperties version=\"1.7\" device=\"CCD Simulator\" name=\"CCD_EXPOSURE\"/>\n"
    );
}

#[test]
fn test_new_number_vector() {
    let element = IndiElement::new_number_vector(
        "CCD Simulator",
        "CCD_EXPOSURE",
        [("CCD_EXPOSURE_VALUE", 2.5)],
    );
    assert_eq!(element.tag, Tag::NewVector(VectorKind::Number));
    assert_eq!(
        encoded(&element),
        "<newNumberVector device=\"CCD Simulator\" name=\"CCD_EXPOSURE\"><oneNumber name=\"CCD_EXPOSURE_VALUE\">2.5</oneNumber></newNumberVector>\n"
    );
}

#[test]
fn test_new_switch_vector() {
    let element = IndiElement::new_switch_vector(
        "Telescope Simulator",
        "CONNECTION",
        [("CONNECT", SwitchState::On), ("DISCONNECT", SwitchState::Off)],
    );
    assert_eq!(
        encoded(&element),
        "<newSwitchVector device=\"Telescope Simulator\" name=\"CONNECTION\"><oneSwitch name=\"CONNECT\">On</oneSwitch><oneSwitch name=\"DISCONNECT\">Off</oneSwitch></newSwitchVector>\n"
    );
}

#[test]
fn test_new_text_vector_escapes() {
    let element = IndiElement::new_text_vector(
        "CCD Simulator",
        "FITS_HEADER",
        [("FITS_OBJECT", "M31 <Andromeda> & \"friends\"")],
    );
    assert_eq!(
        encoded(&element),
        "<newTextVector device=\"CCD Simulator\" name=\"FITS_HEADER\"><oneText name=\"FITS_OBJECT\">M31 &lt;Andromeda&gt; &amp; \"friends\"</oneText></newTextVector>\n"
    );
}

#[test]
fn test_enable_blob() {
    assert_eq!(
        encoded(&IndiElement::enable_blob(BlobMode::Only, "CCD Simulator", None)),
        "<enableBLOB device=\"CCD Simulator\">Only</enableBLOB>\n"
    );
    assert_eq!(
        encoded(&IndiElement::enable_blob(BlobMode::Never, "CCD Simulator", Some("CCD1"))),
        "<enableBLOB device=\"CCD Simulator\" name=\"CCD1\">Never</enableBLOB>\n"
    );
}
