use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use snafu::ResultExt;

use super::service::{LokiError, RenderLabelSnafu};
use crate::{
    event::EnhancedEvent,
    layout::{Layout, LayoutValue},
    template::Template,
};

pub(super) const HOST_LABEL: &str = "host";
pub(super) const NAMESPACE_LABEL: &str = "namespace";
pub(super) const INDEX_LABEL: &str = "index";
pub(super) const CLUSTER_LABEL: &str = "cluster";
pub(super) const NAME_FIELD: &str = "name";

const OBJECT_NAME_TEMPLATE: &str = "{{ .InvolvedObject.Name }}";

/// Derives the stream labels and body layout of one event.
///
/// The configured labels and layout are never modified; per-event labels are
/// added to an owned copy.
#[derive(Clone, Debug)]
pub(super) struct LabelResolver {
    stream_labels: IndexMap<String, Template>,
    ignore_namespaces: HashSet<String>,
    node_layout: Layout,
    object_layout: Layout,
}

impl LabelResolver {
    pub(super) fn new(
        stream_labels: IndexMap<String, Template>,
        layout: &Layout,
        ignore_namespaces: HashSet<String>,
    ) -> Self {
        let mut node_layout = layout.clone();
        node_layout.shift_remove(NAME_FIELD);

        let mut object_layout = layout.clone();
        let name = Template::try_from(OBJECT_NAME_TEMPLATE)
            .map(LayoutValue::Template)
            .unwrap_or_else(|_| LayoutValue::Literal(Value::String(String::new())));
        object_layout.insert(NAME_FIELD.to_owned(), name);

        Self {
            stream_labels,
            ignore_namespaces,
            node_layout,
            object_layout,
        }
    }

    /// The involved object's namespace, if events from it are dropped.
    pub(super) fn ignored<'a>(&self, event: &'a EnhancedEvent) -> Option<&'a str> {
        let namespace = event.involved_object.namespace.as_str();
        self.ignore_namespaces
            .contains(namespace)
            .then_some(namespace)
    }

    /// Node events drop the `name` field, every other event renders it from
    /// the involved object.
    pub(super) fn layout_for(&self, event: &EnhancedEvent) -> &Layout {
        if event.is_node_event() {
            &self.node_layout
        } else {
            &self.object_layout
        }
    }

    /// Renders all stream labels for `event`, `root` being its JSON view.
    pub(super) fn resolve(
        &self,
        event: &EnhancedEvent,
        root: &Value,
    ) -> Result<BTreeMap<String, String>, LokiError> {
        let mut labels = self
            .stream_labels
            .iter()
            .map(|(name, template)| {
                let value = template
                    .render_value(root)
                    .context(RenderLabelSnafu { label: name })?;
                Ok((name.clone(), value))
            })
            .collect::<Result<BTreeMap<_, _>, LokiError>>()?;

        let object = &event.involved_object;
        if event.is_node_event() {
            labels.insert(HOST_LABEL.to_owned(), object.name.clone());
        }
        if !object.namespace.is_empty() {
            let cluster = labels.get(CLUSTER_LABEL).map_or("", String::as_str);
            let index = format!("{cluster}-{}", object.namespace);
            labels.insert(NAMESPACE_LABEL.to_owned(), object.namespace.clone());
            labels.insert(INDEX_LABEL.to_owned(), index);
        }

        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::EnhancedObjectReference;

    fn resolver(labels: &[(&str, &str)], layout: Value, ignore: &[&str]) -> LabelResolver {
        LabelResolver::new(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), Template::try_from(*v).unwrap()))
                .collect(),
            &serde_json::from_value(layout).unwrap(),
            ignore.iter().map(|ns| (*ns).to_owned()).collect(),
        )
    }

    fn event(kind: &str, name: &str, namespace: &str) -> EnhancedEvent {
        EnhancedEvent {
            reason: "Scheduled".into(),
            involved_object: EnhancedObjectReference {
                kind: kind.into(),
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn resolve(resolver: &LabelResolver, event: &EnhancedEvent) -> BTreeMap<String, String> {
        resolver.resolve(event, &event.to_value().unwrap()).unwrap()
    }

    #[test]
    fn node_events_get_host_label_and_no_name_field() {
        let resolver = resolver(&[("app", "kube-events")], json!({"name": "n", "r": "{{ .Reason }}"}), &[]);
        let event = event("Node", "worker-1", "");

        let labels = resolve(&resolver, &event);
        assert_eq!(labels["host"], "worker-1");
        assert_eq!(labels["app"], "kube-events");
        assert!(!labels.contains_key("namespace"));
        assert!(!labels.contains_key("index"));

        let layout = resolver.layout_for(&event);
        assert!(!layout.contains_key("name"));
        assert!(layout.contains_key("r"));
    }

    #[test]
    fn object_events_render_name_from_involved_object() {
        let resolver = resolver(&[], json!({"name": "static"}), &[]);
        let event = event("Pod", "nginx-7c5b", "prod");

        let layout = resolver.layout_for(&event);
        assert_eq!(
            layout["name"],
            LayoutValue::Template(Template::try_from(OBJECT_NAME_TEMPLATE).unwrap())
        );
        assert!(!resolve(&resolver, &event).contains_key("host"));
    }

    #[test]
    fn namespace_and_index_labels() {
        let resolver = resolver(&[("cluster", "dev")], json!({}), &[]);
        let labels = resolve(&resolver, &event("Pod", "p", "prod"));

        assert_eq!(labels["namespace"], "prod");
        assert_eq!(labels["index"], "dev-prod");
        assert_eq!(labels["cluster"], "dev");
    }

    #[test]
    fn index_without_cluster_label() {
        let resolver = resolver(&[], json!({}), &[]);
        let labels = resolve(&resolver, &event("Pod", "p", "prod"));

        assert_eq!(labels["index"], "-prod");
    }

    #[test]
    fn index_uses_rendered_cluster() {
        let resolver = resolver(&[("cluster", "{{ .ClusterName }}")], json!({}), &[]);
        let mut event = event("Pod", "p", "prod");
        event.cluster_name = "eu-1".into();

        assert_eq!(resolve(&resolver, &event)["index"], "eu-1-prod");
    }

    #[test]
    fn per_event_labels_override_configured_ones() {
        let resolver = resolver(&[("namespace", "static"), ("host", "h")], json!({}), &[]);

        let labels = resolve(&resolver, &event("Pod", "p", "prod"));
        assert_eq!(labels["namespace"], "prod");
        assert_eq!(labels["host"], "h");

        let labels = resolve(&resolver, &event("Pod", "p", ""));
        assert_eq!(labels["namespace"], "static");
    }

    #[test]
    fn ignored_namespaces() {
        let resolver = resolver(&[], json!({}), &["kube-system"]);

        assert_eq!(
            resolver.ignored(&event("Pod", "p", "kube-system")),
            Some("kube-system")
        );
        assert_eq!(resolver.ignored(&event("Pod", "p", "prod")), None);
        assert_eq!(resolver.ignored(&event("Node", "n", "")), None);
    }

    #[test]
    fn label_render_failure_names_the_label() {
        let resolver = resolver(&[("team", "{{ .InvolvedObject.Team }}")], json!({}), &[]);
        let event = event("Pod", "p", "prod");

        let error = resolver
            .resolve(&event, &event.to_value().unwrap())
            .unwrap_err();
        assert!(matches!(error, LokiError::RenderLabel { label, .. } if label == "team"));
    }
}
