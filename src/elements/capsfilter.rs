//! The caps-constraining passthrough element.
//!
//! A caps filter is a passthrough transform whose pads carry the filter
//! caps, so negotiation across it is narrowed to the filter without any
//! buffer processing. Once caps are committed, the filter splices the
//! pipeline around itself: the upstream src pad's peer is repointed at
//! the downstream sink pad, removing the per-buffer hop.
//!
//! The splice is not undone on renegotiation; a pipeline that renegotiates
//! caps mid-stream must rebuild its links.

use crate::caps::Caps;
use crate::element::Element;
use crate::error::Result;
use super::transform::{Transform, TransformOps};
use std::sync::Arc;

/// Factory for caps filter elements.
pub struct CapsFilter;

impl CapsFilter {
    /// Create a caps filter constraining negotiation to `filter`.
    pub fn new(name: impl Into<String>, filter: Arc<Caps>) -> Element {
        Transform::builder(name)
            .caps(filter)
            .ops(Box::new(BypassOps))
            .build()
    }
}

struct BypassOps;

impl TransformOps for BypassOps {
    fn caps_committed(
        &self,
        element: &Element,
        _sink_caps: &Arc<Caps>,
        _src_caps: &Arc<Caps>,
    ) -> Result<()> {
        let sinkpad = element.sink_pads().into_iter().next();
        let srcpad = element.src_pads().into_iter().next();
        let (Some(sinkpad), Some(srcpad)) = (sinkpad, srcpad) else {
            return Ok(());
        };
        let (Some(upstream), Some(downstream)) = (sinkpad.peer(), srcpad.peer()) else {
            return Ok(());
        };

        // Splice the dataflow around this element. The upstream pad now
        // pushes straight to the downstream pad; this element keeps its
        // own peers so the state walk still finds it.
        upstream.set_peer(&downstream);
        tracing::debug!(element = element.name(), "dataflow bypass applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::Sink;
    use crate::event::Event;
    use crate::pad::{Pad, PadDirection};
    use crate::query::Query;
    use crate::structure::{Structure, fields, media};
    use crate::value::{UintRange, Value};

    fn width_caps(min: u32, max: u32) -> Arc<Caps> {
        Arc::new(Caps::from_structure(
            Structure::builder(media::VIDEO_RAW)
                .field(fields::WIDTH, Value::UintRange(UintRange::new(min, max, 1)))
                .build(),
        ))
    }

    #[test]
    fn test_filter_narrows_negotiation() {
        let filter = CapsFilter::new("filter", width_caps(0, 800));
        let sink = Sink::builder("sink").caps(width_caps(0, 1280)).build();
        filter.link(&sink).unwrap();

        let mut query = Query::caps(width_caps(640, 1920));
        assert!(filter.static_pad("sink").unwrap().query(&mut query));
        assert_eq!(
            query.caps_result().unwrap().first().unwrap().get(fields::WIDTH),
            Some(&Value::UintRange(UintRange::new(640, 800, 1)))
        );
    }

    #[test]
    fn test_bypass_splices_around_filter() {
        // A bare upstream src pad stands in for a source element.
        let upstream = Pad::builder("src", PadDirection::Src)
            .caps(width_caps(640, 1920))
            .build();

        let filter = CapsFilter::new("filter", Arc::new(Caps::any()));
        let sink = Sink::builder("sink").caps(width_caps(0, 1280)).build();

        Pad::link(&upstream, &filter.static_pad("sink").unwrap()).unwrap();
        filter.link(&sink).unwrap();

        let filter_sink = filter.static_pad("sink").unwrap();
        let filter_src = filter.static_pad("src").unwrap();

        // Run the protocol: query, then commit fixed caps.
        let mut query = Query::caps(upstream.caps());
        assert!(filter_sink.query(&mut query));
        let fixed = Arc::new(query.caps_result().unwrap().fixate().unwrap());
        assert!(filter_sink.send_event(Event::Caps(Arc::clone(&fixed))));

        // sink.peer.peer == src.peer: the upstream pad now feeds the
        // downstream sink pad directly.
        let respliced = filter_sink.peer().unwrap().peer().unwrap();
        assert!(Arc::ptr_eq(&respliced, &filter_src.peer().unwrap()));

        // Buffers pushed from upstream land in the real sink.
        let buffer = crate::buffer::Buffer::allocate(8).unwrap();
        upstream.push(buffer).unwrap();
        assert_eq!(
            crate::object::Properties::get_property(&sink, "rendered").unwrap(),
            crate::object::PropertyValue::Uint(1)
        );
    }
}
