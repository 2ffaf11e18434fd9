//! Dispatcher tests: element routing, event ordering and rejection

use indi_core::{dispatch, Error, Event, EventKind, Registry, StreamDecoder, VectorKind};

struct Harness {
    registry: Registry,
    decoder: StreamDecoder,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            decoder: StreamDecoder::new(),
        }
    }

    /// Feed raw XML and return the events from every element that applied
    fn feed(&mut self, xml: &str) -> Vec<Event> {
        let mut events = Vec::new();
        for element in self.decoder.feed(xml.as_bytes()) {
            let _ = dispatch(&mut self.registry, &element, &mut events);
        }
        events
    }

    fn feed_one(&mut self, xml: &str) -> Result<Vec<Event>, Error> {
        let mut elements = self.decoder.feed(xml.as_bytes());
        assert_eq!(elements.len(), 1);
        let mut events = Vec::new();
        dispatch(&mut self.registry, &elements.remove(0), &mut events)?;
        Ok(events)
    }
}

const CONNECTION_DEF: &str = "<defSwitchVector device=\"CCD Simulator\" name=\"CONNECTION\" rule=\"OneOfMany\" perm=\"rw\" state=\"Idle\">\
    <defSwitch name=\"CONNECT\">Off</defSwitch><defSwitch name=\"DISCONNECT\">On</defSwitch></defSwitchVector>";

fn connection_set(connect: &str, disconnect: &str) -> String {
    format!(
        "<setSwitchVector device=\"CCD Simulator\" name=\"CONNECTION\" state=\"Ok\">\
         <oneSwitch name=\"CONNECT\">{connect}</oneSwitch><oneSwitch name=\"DISCONNECT\">{disconnect}</oneSwitch>\
         </setSwitchVector>"
    )
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(Event::kind).collect()
}

#[test]
fn test_definition_event_order() {
    let mut h = Harness::new();
    let events = h.feed(CONNECTION_DEF);
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::NewDevice,
            EventKind::NewProperty,
            EventKind::Defined(VectorKind::Switch),
        ]
    );

    // Redefinition does not announce the device again
    let events = h.feed(CONNECTION_DEF);
    assert_eq!(
        kinds(&events),
        vec![EventKind::NewProperty, EventKind::Defined(VectorKind::Switch)]
    );
}

#[test]
fn test_definition_never_reports_connection() {
    let mut h = Harness::new();
    let events = h.feed(&CONNECTION_DEF.replace(">Off<", ">On<"));
    assert!(!events.iter().any(|e| matches!(e, Event::DeviceConnected { .. })));
}

#[test]
fn test_connect_then_disconnect() {
    let mut h = Harness::new();
    h.feed(CONNECTION_DEF);

    let events = h.feed(&connection_set("On", "Off"));
    assert_eq!(
        events,
        vec![
            Event::Updated {
                device: "CCD Simulator".to_string(),
                property: "CONNECTION".to_string(),
                kind: VectorKind::Switch,
            },
            Event::DeviceConnected {
                device: "CCD Simulator".to_string(),
            },
        ]
    );

    // Repeating the same state is an update only
    let events = h.feed(&connection_set("On", "Off"));
    assert_eq!(kinds(&events), vec![EventKind::Updated(VectorKind::Switch)]);

    let events = h.feed(&connection_set("Off", "On"));
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::Updated(VectorKind::Switch),
            EventKind::DeviceDisconnected,
        ]
    );
}

#[test]
fn test_disconnect_element_alone() {
    let mut h = Harness::new();
    let events = h.feed(
        "<setSwitchVector device=\"Focuser\" name=\"CONNECTION\">\
         <oneSwitch name=\"DISCONNECT\">On</oneSwitch></setSwitchVector>",
    );
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::NewDevice,
            EventKind::Updated(VectorKind::Switch),
            EventKind::DeviceDisconnected,
        ]
    );
}

#[test]
fn test_update_of_unknown_property_creates_it() {
    let mut h = Harness::new();
    let events = h.feed(
        "<setNumberVector device=\"CCD Simulator\" name=\"CCD_TEMPERATURE\" state=\"Busy\">\
         <oneNumber name=\"CCD_TEMPERATURE_VALUE\">-10</oneNumber></setNumberVector>",
    );
    assert_eq!(
        kinds(&events),
        vec![EventKind::NewDevice, EventKind::Updated(VectorKind::Number)]
    );
    let temps = h
        .registry
        .device("CCD Simulator")
        .and_then(|d| d.number("CCD_TEMPERATURE"))
        .expect("missing temperature");
    assert_eq!(temps["CCD_TEMPERATURE_VALUE"], -10.0);
}

#[test]
fn test_kind_mismatch_dropped() {
    let mut h = Harness::new();
    h.feed(CONNECTION_DEF);

    let result = h.feed_one(
        "<setNumberVector device=\"CCD Simulator\" name=\"CONNECTION\">\
         <oneNumber name=\"CONNECT\">1</oneNumber></setNumberVector>",
    );
    match result {
        Err(Error::KindMismatch { existing, incoming, .. }) => {
            assert_eq!(existing, VectorKind::Switch);
            assert_eq!(incoming, VectorKind::Number);
        }
        other => panic!("Expected KindMismatch, got {:?}", other),
    }

    let switches = h
        .registry
        .device("CCD Simulator")
        .and_then(|d| d.switch("CONNECTION"))
        .expect("property replaced");
    assert!(switches["DISCONNECT"]);
}

#[test]
fn test_missing_name_rejected() {
    let mut h = Harness::new();
    let result = h.feed_one("<defTextVector device=\"CCD Simulator\"><defText name=\"A\">b</defText></defTextVector>");
    assert!(matches!(result, Err(Error::MissingName { .. })));
    assert!(h.registry.is_empty());
}

#[test]
fn test_missing_device_rejected() {
    let mut h = Harness::new();
    let result = h.feed_one("<setTextVector name=\"P\"><oneText name=\"A\">b</oneText></setTextVector>");
    assert!(matches!(result, Err(Error::MissingDevice { .. })));
}

#[test]
fn test_device_message_creates_device() {
    let mut h = Harness::new();
    let events = h.feed(
        "<message device=\"Dome Simulator\" timestamp=\"2024-03-01T21:04:11\" message=\"Dome is parked\"/>",
    );
    assert_eq!(
        events,
        vec![
            Event::NewDevice {
                device: "Dome Simulator".to_string(),
            },
            Event::Message {
                device: Some("Dome Simulator".to_string()),
                message: "Dome is parked".to_string(),
                timestamp: Some("2024-03-01T21:04:11".to_string()),
            },
        ]
    );
    assert!(h.registry.device("Dome Simulator").is_some());
}

#[test]
fn test_del_property() {
    let mut h = Harness::new();
    h.feed(CONNECTION_DEF);

    let events = h.feed("<delProperty device=\"CCD Simulator\" name=\"CONNECTION\"/>");
    assert_eq!(
        events,
        vec![Event::RemoveProperty {
            device: "CCD Simulator".to_string(),
            property: "CONNECTION".to_string(),
        }]
    );
    assert!(h.registry.device("CCD Simulator").is_some());

    // Unknown property: nothing happens
    assert!(h.feed("<delProperty device=\"CCD Simulator\" name=\"CONNECTION\"/>").is_empty());
}

#[test]
fn test_del_property_without_name_removes_device() {
    let mut h = Harness::new();
    h.feed(CONNECTION_DEF);

    let events = h.feed("<delProperty device=\"CCD Simulator\"/>");
    assert_eq!(
        kinds(&events),
        vec![EventKind::RemoveProperty, EventKind::RemoveDevice]
    );
    assert!(h.registry.is_empty());
}

#[test]
fn test_client_traffic_ignored() {
    let mut h = Harness::new();
    let echoes = [
        "<getProperties version=\"1.7\" device=\"CCD Simulator\"/>",
        "<newNumberVector device=\"CCD Simulator\" name=\"CCD_EXPOSURE\"><oneNumber name=\"CCD_EXPOSURE_VALUE\">1</oneNumber></newNumberVector>",
        "<oneNumber device=\"CCD Simulator\" name=\"CCD_EXPOSURE_VALUE\">1</oneNumber>",
        "<oneSwitch device=\"CCD Simulator\" name=\"CONNECT\">On</oneSwitch>",
        "<oneText device=\"CCD Simulator\" name=\"OBJECT\">M31</oneText>",
        "<oneBLOB device=\"CCD Simulator\" name=\"CCD1\" size=\"0\" format=\".fits\"></oneBLOB>",
        "<enableBLOB device=\"CCD Simulator\" name=\"CCD1\">Also</enableBLOB>",
    ];
    for xml in echoes {
        let events = h.feed_one(xml).expect("echo should be accepted");
        assert!(events.is_empty(), "{} produced events", xml);
    }
    assert!(h.registry.is_empty());
}

#[test]
fn test_malformed_member_leaves_property_intact() {
    let mut h = Harness::new();
    h.feed(
        "<defNumberVector device=\"Focuser\" name=\"P\" perm=\"rw\" state=\"Idle\">\
         <defNumber name=\"X\">1</defNumber><defNumber name=\"Y\">2</defNumber></defNumberVector>",
    );

    let events = h.feed(
        "<setNumberVector device=\"Focuser\" name=\"P\" state=\"Ok\">\
         <oneNumber name=X>5</oneNumber><oneNumber name=\"Y\">7</oneNumber></setNumberVector>",
    );
    assert!(events.is_empty());

    let property = h
        .registry
        .property("Focuser", "P")
        .expect("property missing");
    assert_eq!(property.elements.len(), 2);
    assert_eq!(property.element("X").and_then(|e| e.value.as_f64()), Some(1.0));
    assert_eq!(property.element("Y").and_then(|e| e.value.as_f64()), Some(2.0));

    // The stream carries on with the next element
    let events = h.feed(
        "<setNumberVector device=\"Focuser\" name=\"P\"><oneNumber name=\"Y\">7</oneNumber></setNumberVector>",
    );
    assert_eq!(kinds(&events), vec![EventKind::Updated(VectorKind::Number)]);
}

#[test]
fn test_bad_element_does_not_stop_stream() {
    let mut h = Harness::new();
    let events = h.feed(&format!(
        "<defNumberVector device=\"CCD Simulator\" name=\"BAD\"><defNumber name=\"X\">fast</defNumber></defNumberVector>{}",
        CONNECTION_DEF
    ));
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::NewDevice,
            EventKind::NewProperty,
            EventKind::Defined(VectorKind::Switch),
        ]
    );
    assert!(h.registry.property("CCD Simulator", "BAD").is_none());
}
