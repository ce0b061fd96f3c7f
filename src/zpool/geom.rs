//! Typed view of the GEOM topology document (`kern.geom.confxml`).
//!
//! Only what device resolution needs is kept: classes, their geoms, and each geom's providers and
//! consumers. Consumers point at providers by id.
use crate::parsers::geom::{parse_document, Element};

use super::ZpoolResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct GeomMesh {
    classes: Vec<GeomClass>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct GeomClass {
    id:    String,
    name:  String,
    geoms: Vec<Geom>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct Geom {
    id:        String,
    name:      String,
    providers: Vec<Provider>,
    consumers: Vec<Consumer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct Provider {
    id:   String,
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct Consumer {
    id:           String,
    /// Id of the provider this consumer is attached to.
    provider_ref: Option<String>,
}

fn attr(element: &Element, key: &str) -> String {
    element.attribute(key).unwrap_or_default().to_string()
}

fn text(element: &Element, child: &str) -> String {
    element.child_text(child).unwrap_or_default().to_string()
}

impl GeomMesh {
    /// Mesh without any classes. Every lookup misses.
    pub fn empty() -> GeomMesh { GeomMesh::default() }

    pub fn from_xml(document: &str) -> ZpoolResult<GeomMesh> {
        let mesh = parse_document(document)?;
        let classes = mesh
            .children_named("class")
            .map(|class| GeomClass {
                id:    attr(class, "id"),
                name:  text(class, "name"),
                geoms: class
                    .children_named("geom")
                    .map(|geom| Geom {
                        id:        attr(geom, "id"),
                        name:      text(geom, "name"),
                        providers: geom
                            .children_named("provider")
                            .map(|p| Provider { id: attr(p, "id"), name: text(p, "name") })
                            .collect(),
                        consumers: geom
                            .children_named("consumer")
                            .map(|c| Consumer {
                                id:           attr(c, "id"),
                                provider_ref: c
                                    .child("provider")
                                    .and_then(|p| p.attribute("ref"))
                                    .map(String::from),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        Ok(GeomMesh { classes })
    }

    pub fn class(&self, name: &str) -> Option<&GeomClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    fn geoms_of<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a Geom> + 'a {
        self.classes.iter().filter(move |c| c.name == class).flat_map(|c| c.geoms.iter())
    }

    /// Geom of `class` that exposes a provider called `provider_name`.
    fn geom_with_provider<'a>(&'a self, class: &'a str, provider_name: &str) -> Option<&'a Geom> {
        self.geoms_of(class).find(|geom| geom.providers.iter().any(|p| p.name == provider_name))
    }

    /// Provider with given id and the geom owning it, in any class.
    pub fn provider_by_id(&self, id: &str) -> Option<(&Geom, &Provider)> {
        self.classes
            .iter()
            .flat_map(|class| class.geoms.iter())
            .find_map(|geom| geom.providers.iter().find(|p| p.id == id).map(|p| (geom, p)))
    }

    /// For an ELI provider named `name`, the name of the provider it encrypts.
    pub fn eli_backing_provider(&self, name: &str) -> Option<&str> {
        let geom = self.geom_with_provider("ELI", name)?;
        let provider_ref = geom.consumers.iter().find_map(|c| c.provider_ref.as_deref())?;
        self.provider_by_id(provider_ref).map(|(_, provider)| provider.name.as_str())
    }

    /// For a LABEL provider named `name`, the label geom name and the id of the provider the label
    /// sits on.
    pub fn label_source(&self, name: &str) -> Option<(&str, &str)> {
        let geom = self.geom_with_provider("LABEL", name)?;
        let provider_ref = geom.consumers.iter().find_map(|c| c.provider_ref.as_deref())?;
        Some((geom.name.as_str(), provider_ref))
    }

    /// For a DEV geom named `name`, the id of the provider it consumes.
    pub fn dev_source(&self, name: &str) -> Option<&str> {
        self.geoms_of("DEV")
            .filter(|geom| geom.name == name)
            .flat_map(|geom| geom.consumers.iter())
            .find_map(|c| c.provider_ref.as_deref())
    }

    /// Name of the geom that owns provider `id`. For a partition that is the disk.
    pub fn provider_owner(&self, id: &str) -> Option<&str> {
        self.provider_by_id(id).map(|(geom, _)| geom.name.as_str())
    }
}
