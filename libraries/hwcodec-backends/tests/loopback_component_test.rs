//! Components running real framers over the loopback driver

use hwcodec_backends::{synthetic, CodecFormat, FormatBackend, LoopbackSettings};
use hwcodec_component::{Component, ResourceManager};
use hwcodec_core::{
    BufferFlags, BufferHeader, ChannelHost, CodecClass, Command, ComponentConfig, ComponentEvent,
    ComponentState, ConfigValue, HostMessage, HostReceiver, PortConfig, PortIndex,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    component: Component,
    rx: HostReceiver,
    skipped: Vec<HostMessage>,
    inputs: Vec<BufferHeader>,
    outputs: Vec<BufferHeader>,
}

impl Rig {
    fn start(format: CodecFormat, settings: LoopbackSettings) -> Self {
        let port = |count| PortConfig {
            buffer_count: count,
            min_buffer_count: 1,
            buffer_size: 256,
            enabled: true,
        };
        let mut config = ComponentConfig::new(format.as_str(), CodecClass::Decode);
        config.input = port(4);
        config.output = port(4);
        config.transition_timeout_ms = Some(WAIT.as_millis() as u64);

        let (host, rx) = ChannelHost::new();
        let component = Component::new(
            config,
            Box::new(FormatBackend::loopback(format, settings)),
            Arc::new(host),
            Arc::new(ResourceManager::default()),
        )
        .unwrap();

        let mut rig = Self {
            component,
            rx,
            skipped: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        rig.command(Command::StateSet(ComponentState::Idle));
        rig.inputs = (0..4)
            .map(|_| rig.component.allocate_buffer(PortIndex::Input, 256).unwrap())
            .collect();
        rig.outputs = (0..4)
            .map(|_| rig.component.allocate_buffer(PortIndex::Output, 256).unwrap())
            .collect();
        rig.complete(Command::StateSet(ComponentState::Idle));
        rig.command(Command::StateSet(ComponentState::Executing));
        rig.complete(Command::StateSet(ComponentState::Executing));

        for output in std::mem::take(&mut rig.outputs) {
            rig.component.fill_this_buffer(output).unwrap();
        }
        rig
    }

    fn command(&self, command: Command) {
        self.component.send_command(command).unwrap();
    }

    fn wait(&mut self, what: &str, pred: impl Fn(&HostMessage) -> bool) -> HostMessage {
        if let Some(pos) = self.skipped.iter().position(&pred) {
            return self.skipped.remove(pos);
        }
        self.rx
            .wait_for(WAIT, &mut self.skipped, pred)
            .unwrap_or_else(|| panic!("timed out waiting for {what}: {:?}", self.skipped))
    }

    fn complete(&mut self, command: Command) {
        self.wait("command completion", |m| {
            matches!(m, HostMessage::Event(ComponentEvent::CommandComplete(c)) if *c == command)
        });
    }

    fn fill(&mut self) -> BufferHeader {
        match self.wait("filled buffer", |m| matches!(m, HostMessage::FillDone(_))) {
            HostMessage::FillDone(header) => header,
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Queue one chunk, reusing an input buffer the component handed back
    fn feed(&mut self, chunk: &[u8], timestamp: i64, flags: BufferFlags) {
        let mut header = match self.inputs.pop() {
            Some(header) => header,
            None => match self.wait("empty buffer", |m| matches!(m, HostMessage::EmptyDone(_))) {
                HostMessage::EmptyDone(header) => header,
                other => panic!("unexpected {other:?}"),
            },
        };
        header.write_payload(chunk);
        header.timestamp = timestamp;
        header.flags = flags;
        self.component.empty_this_buffer(header).unwrap();
    }
}

#[test]
fn h264_units_are_reassembled_across_buffers() {
    let pictures = synthetic::pictures(CodecFormat::H264, 3, 40);
    let mut rig = Rig::start(CodecFormat::H264, LoopbackSettings::default());

    // Cut each picture in two; the framer finds the picture starts again
    for (n, picture) in pictures.iter().enumerate() {
        let (head, tail) = picture.split_at(picture.len() / 2);
        let last = n + 1 == pictures.len();
        rig.feed(head, n as i64 * 40, BufferFlags::empty());
        let flags = if last { BufferFlags::EOS } else { BufferFlags::empty() };
        rig.feed(tail, n as i64 * 40 + 20, flags);
    }

    for (n, picture) in pictures.iter().enumerate() {
        let out = rig.fill();
        assert_eq!(out.payload(), picture.as_slice(), "picture {n}");
        assert_eq!(out.timestamp, n as i64 * 40);
        assert_eq!(out.flags.contains(BufferFlags::EOS), n == 2);
    }
    rig.wait("end of stream", |m| {
        matches!(
            m,
            HostMessage::Event(ComponentEvent::BufferFlag { port: PortIndex::Output, .. })
        )
    });
}

#[test]
fn several_pictures_in_one_buffer_come_out_separately() {
    let pictures = synthetic::pictures(CodecFormat::Mpeg4, 3, 20);
    let mut rig = Rig::start(CodecFormat::Mpeg4, LoopbackSettings::default());

    rig.feed(&pictures.concat(), 100, BufferFlags::EOS);

    for picture in &pictures {
        assert_eq!(rig.fill().payload(), picture.as_slice());
    }
}

#[test]
fn delayed_output_keeps_its_own_timestamp() {
    let settings = LoopbackSettings {
        latency: 1,
        ..LoopbackSettings::default()
    };
    let pictures = synthetic::pictures(CodecFormat::Vc1, 3, 16);
    let mut rig = Rig::start(CodecFormat::Vc1, settings);

    for (n, picture) in pictures.iter().enumerate() {
        let mut flags = BufferFlags::END_OF_FRAME;
        if n + 1 == pictures.len() {
            flags |= BufferFlags::EOS;
        }
        rig.feed(picture, 1000 + n as i64, flags);
    }

    // The driver holds one unit back; end-of-stream flushes it out
    for (n, picture) in pictures.iter().enumerate() {
        let out = rig.fill();
        assert_eq!(out.payload(), picture.as_slice(), "picture {n}");
        assert_eq!(out.timestamp, 1000 + n as i64);
        assert_eq!(out.flags.contains(BufferFlags::EOS), n == 2, "picture {n}");
    }
    rig.wait("end of stream", |m| {
        matches!(
            m,
            HostMessage::Event(ComponentEvent::BufferFlag { port: PortIndex::Output, .. })
        )
    });
}

#[test]
fn bare_end_of_stream_flushes_held_pictures() {
    let settings = LoopbackSettings {
        latency: 2,
        ..LoopbackSettings::default()
    };
    let pictures = synthetic::pictures(CodecFormat::Vc1, 2, 16);
    let mut rig = Rig::start(CodecFormat::Vc1, settings);

    rig.feed(&pictures[0], 0, BufferFlags::END_OF_FRAME);
    rig.feed(&pictures[1], 40, BufferFlags::END_OF_FRAME);
    rig.feed(&[], 80, BufferFlags::EOS);

    let first = rig.fill();
    assert_eq!(first.payload(), pictures[0].as_slice());
    assert_eq!(first.timestamp, 0);
    assert!(!first.flags.contains(BufferFlags::EOS));

    let last = rig.fill();
    assert_eq!(last.payload(), pictures[1].as_slice());
    assert_eq!(last.timestamp, 40);
    assert!(last.flags.contains(BufferFlags::EOS));
}

#[test]
fn geometry_change_raises_port_settings_event() {
    let pictures = synthetic::pictures(CodecFormat::H263, 2, 16);
    let mut rig = Rig::start(CodecFormat::H263, LoopbackSettings::default());

    rig.component
        .set_config("width", ConfigValue::Int(1920))
        .unwrap();
    assert_eq!(
        rig.component.get_config("width").unwrap(),
        ConfigValue::Int(1920)
    );

    rig.feed(&pictures[0], 0, BufferFlags::END_OF_FRAME);
    rig.wait("port settings change", |m| {
        *m == HostMessage::Event(ComponentEvent::PortSettingsChanged(PortIndex::Output))
    });

    rig.feed(&pictures[1], 40, BufferFlags::END_OF_FRAME);
    let out = rig.fill();
    assert_eq!(out.payload(), pictures[1].as_slice());
    assert_eq!(out.timestamp, 40);
}

#[test]
fn wmv_treats_each_buffer_as_a_frame() {
    let mut rig = Rig::start(CodecFormat::Wmv, LoopbackSettings::default());
    rig.feed(&[0x11; 30], 0, BufferFlags::empty());
    rig.feed(&[0x22; 12], 40, BufferFlags::empty());

    assert_eq!(rig.fill().payload(), &[0x11; 30]);
    assert_eq!(rig.fill().payload(), &[0x22; 12]);
}
