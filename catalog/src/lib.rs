#[macro_use]
extern crate anyhow;

pub mod filters;
mod handlers;

use rust_embed::RustEmbed;
use tera::Tera;

#[derive(RustEmbed)]
#[folder = "templates/"]
struct Templates;

/// Anything that can enumerate the dataset paths it currently serves can be
/// browsed through the catalog. The aggregation engine's own `Datasets`
/// registry implements this directly.
pub trait Catalog {
    fn paths(&self) -> Box<dyn Iterator<Item = String> + '_>;
}

/// Load the embedded catalog templates into a `Tera` instance.
pub fn templates() -> anyhow::Result<Tera> {
    let mut tera = Tera::default();
    for name in Templates::iter() {
        let file = Templates::get(&name).ok_or_else(|| anyhow!("missing embedded template"))?;
        let content = std::str::from_utf8(file.data.as_ref())?;
        tera.add_raw_template(&name, content)?;
    }
    Ok(tera)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    pub struct TestCatalog(Vec<String>);

    impl TestCatalog {
        pub fn test() -> TestCatalog {
            TestCatalog(vec![
                "path1/hula.nc".to_string(),
                "path1/hula2.nc".to_string(),
                "other/file.nc".to_string(),
            ])
        }
    }

    impl Catalog for TestCatalog {
        fn paths(&self) -> Box<dyn Iterator<Item = String> + '_> {
            Box::new(self.0.iter().cloned())
        }
    }

    #[test]
    fn loads_embedded_templates() {
        let t = templates().unwrap();
        assert!(t.get_template_names().any(|n| n == "catalog.html.tera"));
    }
}
