//! Snapshot extraction.
//!
//! Turns the types of a loaded module into [`TypeDescriptor`]s. Property
//! lists mirror what reflection reports for a type: its public properties
//! followed by the public instance properties of its base types, with a
//! derived property hiding a base property of the same name.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::metadata::signature::decode_property_type;
use crate::sandbox::{LoadContext, ModuleView, ResolvedType, TypeFilter, TypeHandle};
use crate::types::{PropertyDescriptor, TypeDescriptor};

/// Type name used when a property type cannot be rendered.
pub const UNKNOWN_TYPE: &str = "UnknownType";

/// Bound on the base-type chain walked for inherited properties.
const MAX_BASE_DEPTH: usize = 64;

/// Where a rule places its replacement relative to the captured name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RulePosition {
    Prefix,
    Suffix,
}

/// A name rewrite: every match of `pattern` becomes capture group 1 with
/// `replacement` attached at `position`.
#[derive(Clone, Debug)]
pub struct NormalizationRule {
    pub pattern: Regex,
    pub replacement: String,
    pub position: RulePosition,
}

impl NormalizationRule {
    pub fn new(pattern: Regex, replacement: impl Into<String>, position: RulePosition) -> Self {
        Self {
            pattern,
            replacement: replacement.into(),
            position,
        }
    }

    /// Apply until the name stops changing.
    pub fn apply(&self, name: &str) -> String {
        let template = match self.position {
            RulePosition::Prefix => format!("{}${{1}}", escape_template(&self.replacement)),
            RulePosition::Suffix => format!("${{1}}{}", escape_template(&self.replacement)),
        };
        let mut current = name.to_string();
        loop {
            let next = self.pattern.replace_all(&current, template.as_str()).into_owned();
            if next == current {
                return current;
            }
            current = next;
        }
    }
}

fn escape_template(text: &str) -> String {
    text.replace('$', "$$")
}

/// Built-in rules: `System.Nullable`1[[T]]` becomes `T?`.
pub static DEFAULT_RULES: Lazy<Vec<NormalizationRule>> = Lazy::new(|| {
    vec![NormalizationRule::new(
        Regex::new(r"System\.Nullable`1\[\[([^\[\]]+)\]\]").expect("nullable pattern is valid"),
        "?",
        RulePosition::Suffix,
    )]
});

/// Apply `rules` in order.
pub fn normalize(name: &str, rules: &[NormalizationRule]) -> String {
    rules
        .iter()
        .fold(name.to_string(), |current, rule| rule.apply(&current))
}

/// Descriptors for every type of the module that passes `filter`.
pub fn extract_module(
    view: &ModuleView<'_>,
    filter: &TypeFilter<'_>,
    rules: &[NormalizationRule],
) -> Vec<TypeDescriptor> {
    view.types()
        .filter(|handle| filter.includes(*handle))
        .filter_map(|handle| extract_type(view.context(), handle, rules))
        .collect()
}

/// Descriptor of one type. `None` only when the handle is not a type of
/// the context.
pub fn extract_type(
    context: &LoadContext,
    handle: TypeHandle,
    rules: &[NormalizationRule],
) -> Option<TypeDescriptor> {
    let full_name = context.full_name(handle)?;
    let mut properties = Vec::new();
    let mut seen = HashSet::new();

    let mut current = Some((handle, Vec::new()));
    let mut depth = 0;
    while let Some((handle, generic_args)) = current.take() {
        let declared = depth == 0;
        let Some(module) = context.module(handle.module) else {
            break;
        };
        let metadata = module.metadata();
        let Some(row) = metadata.type_defs.get(handle.index) else {
            break;
        };

        for property in row.properties.iter().filter_map(|p| metadata.properties.get(*p)) {
            if !property.is_public || (!declared && property.is_static) {
                continue;
            }
            if !seen.insert(property.name.clone()) {
                continue;
            }
            let type_name = decode_property_type(&property.signature)
                .and_then(|sig| sig.render(metadata, &generic_args))
                .map(|name| normalize(&name, rules))
                .unwrap_or_else(|| UNKNOWN_TYPE.to_string());
            properties.push(PropertyDescriptor::new(property.name.clone(), type_name));
        }

        depth += 1;
        if depth >= MAX_BASE_DEPTH {
            tracing::debug!("Base chain of {} is too deep; stopping", full_name);
            break;
        }
        current = match context.base_type(handle, &generic_args) {
            Some(base) => match base.ty {
                ResolvedType::Def(base_handle) => Some((base_handle, base.generic_args)),
                ResolvedType::External(_) => None,
            },
            None => None,
        };
    }

    Some(TypeDescriptor::new(full_name, properties))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builder::{MetadataBuilder, SigType, TypeToken};
    use crate::sandbox::Sandbox;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn extract(builder: &MetadataBuilder, filter: Option<&str>) -> Vec<TypeDescriptor> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Fixture.dll");
        fs::write(&path, builder.build()).unwrap();
        extract_path(&path, filter)
    }

    fn extract_path(path: &Path, filter: Option<&str>) -> Vec<TypeDescriptor> {
        let mut sandbox = Sandbox::new("extract");
        sandbox.load(path, "ctx", filter).unwrap();
        let mut out = Vec::new();
        sandbox.run("ctx", |view, filter| {
            out.extend(extract_module(view, filter, &DEFAULT_RULES));
        });
        out
    }

    fn props(descriptor: &TypeDescriptor) -> Vec<String> {
        descriptor.properties.iter().map(|p| p.to_string()).collect()
    }

    fn find<'a>(descriptors: &'a [TypeDescriptor], name: &str) -> &'a TypeDescriptor {
        descriptors.iter().find(|d| d.full_name == name).unwrap()
    }

    #[test]
    fn test_default_rule_collapses_nullable() {
        assert_eq!(
            normalize("System.Nullable`1[[System.Int32]]", &DEFAULT_RULES),
            "System.Int32?"
        );
        assert_eq!(
            normalize(
                "System.Collections.Generic.List`1[[System.Nullable`1[[System.DateTime]]]]",
                &DEFAULT_RULES
            ),
            "System.Collections.Generic.List`1[[System.DateTime?]]"
        );
        assert_eq!(normalize("System.String", &DEFAULT_RULES), "System.String");
    }

    #[test]
    fn test_prefix_rule() {
        let rule = NormalizationRule::new(
            Regex::new(r"Ref<([^<>]+)>").unwrap(),
            "&",
            RulePosition::Prefix,
        );
        assert_eq!(rule.apply("Ref<Ref<System.Int32>>"), "&&System.Int32");
    }

    #[test]
    fn test_module_pseudo_type_excluded() {
        let mut builder = MetadataBuilder::new("Lib");
        builder.add_type("Lib", "Only");
        let descriptors = extract(&builder, None);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].full_name, "Lib.Only");
    }

    #[test]
    fn test_property_types_render() {
        let mut builder = MetadataBuilder::new("Lib");
        let corlib = builder.assembly_ref("mscorlib");
        let nullable = builder.type_ref(corlib, "System", "Nullable`1");
        let dictionary = builder.type_ref(corlib, "System.Collections.Generic", "Dictionary`2");
        let order = builder.add_type("Shop", "Order");
        let line = builder.add_type("", "Line");
        builder.nested_in(line, order);

        builder.property(order, "Id", SigType::I4);
        builder.property(order, "Note", SigType::String);
        builder.property(
            order,
            "Shipped",
            SigType::GenericInst {
                base: nullable,
                value_type: true,
                args: vec![SigType::I8],
            },
        );
        builder.property(
            order,
            "Tags",
            SigType::GenericInst {
                base: dictionary,
                value_type: false,
                args: vec![SigType::String, SigType::SzArray(Box::new(SigType::I4))],
            },
        );
        builder.property(order, "Lines", SigType::SzArray(Box::new(SigType::Class(line))));
        builder.property(order, "Grid", SigType::Array { element: Box::new(SigType::R8), rank: 2 });
        builder.property(order, "Open", SigType::Var(0));
        builder.private_property(order, "Hidden", SigType::I4);

        let descriptors = extract(&builder, None);
        assert_eq!(
            props(find(&descriptors, "Shop.Order")),
            vec![
                "System.Int32 Id",
                "System.String Note",
                "System.Int64? Shipped",
                "System.Collections.Generic.Dictionary`2[[System.String],[System.Int32[]]] Tags",
                "Shop.Order+Line[] Lines",
                "System.Double[,] Grid",
                "UnknownType Open",
            ]
        );
        assert!(find(&descriptors, "Shop.Order+Line").properties.is_empty());
    }

    #[test]
    fn test_inherited_properties_follow_declared() {
        let mut builder = MetadataBuilder::new("Lib");
        let animal = builder.add_type("Zoo", "Animal");
        builder.property(animal, "Name", SigType::String);
        builder.property(animal, "Legs", SigType::I4);
        builder.static_property(animal, "Count", SigType::I4);

        let dog = builder.add_type("Zoo", "Dog");
        builder.extends(dog, animal);
        builder.property(dog, "Breed", SigType::String);
        builder.property(dog, "Legs", SigType::I8);

        let descriptors = extract(&builder, None);
        assert_eq!(
            props(find(&descriptors, "Zoo.Dog")),
            vec!["System.String Breed", "System.Int64 Legs", "System.String Name"]
        );
        assert_eq!(
            props(find(&descriptors, "Zoo.Animal")),
            vec!["System.String Name", "System.Int32 Legs", "System.Int32 Count"]
        );
    }

    #[test]
    fn test_generic_base_arguments_substituted() {
        let mut builder = MetadataBuilder::new("Lib");
        let boxed = builder.add_type("Gen", "Box`1");
        builder.property(boxed, "Value", SigType::Var(0));
        builder.property(boxed, "Items", SigType::SzArray(Box::new(SigType::Var(0))));
        let instance = builder.generic_instance(boxed, vec![SigType::String]);
        let text = builder.add_type("Gen", "TextBox");
        builder.extends(text, instance);

        let descriptors = extract(&builder, None);
        assert_eq!(
            props(find(&descriptors, "Gen.TextBox")),
            vec!["System.String Value", "System.String[] Items"]
        );
        assert_eq!(
            props(find(&descriptors, "Gen.Box`1")),
            vec!["UnknownType Value", "UnknownType Items"]
        );
    }

    #[test]
    fn test_inherits_across_sibling_modules() {
        let dir = TempDir::new().unwrap();
        let mut core = MetadataBuilder::new("Core");
        let entity = core.add_type("Core", "Entity");
        core.property(entity, "Id", SigType::I4);
        fs::write(dir.path().join("Core.dll"), core.build()).unwrap();

        let mut app = MetadataBuilder::new("App");
        let core_ref = app.assembly_ref("Core");
        let entity_ref = app.type_ref(core_ref, "Core", "Entity");
        let user = app.add_type("App", "User");
        app.extends(user, entity_ref);
        app.property(user, "Email", SigType::String);
        let app_path = dir.path().join("App.dll");
        fs::write(&app_path, app.build()).unwrap();

        let descriptors = extract_path(&app_path, None);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(
            props(&descriptors[0]),
            vec!["System.String Email", "System.Int32 Id"]
        );
    }

    #[test]
    fn test_inherits_through_dependency_of_dependency() {
        let dir = TempDir::new().unwrap();
        let mut base = MetadataBuilder::new("Base");
        let root = base.add_type("Base", "Root");
        base.property(root, "Id", SigType::I4);
        fs::write(dir.path().join("Base.dll"), base.build()).unwrap();

        let mut core = MetadataBuilder::new("Core");
        let base_ref = core.assembly_ref("Base");
        let root_ref = core.type_ref(base_ref, "Base", "Root");
        let entity = core.add_type("Core", "Entity");
        core.extends(entity, root_ref);
        core.property(entity, "Name", SigType::String);
        fs::write(dir.path().join("Core.dll"), core.build()).unwrap();

        let mut app = MetadataBuilder::new("App");
        let core_ref = app.assembly_ref("Core");
        let entity_ref = app.type_ref(core_ref, "Core", "Entity");
        let user = app.add_type("App", "User");
        app.extends(user, entity_ref);
        app.property(user, "Email", SigType::String);
        let app_path = dir.path().join("App.dll");
        fs::write(&app_path, app.build()).unwrap();

        let descriptors = extract_path(&app_path, None);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(
            props(&descriptors[0]),
            vec!["System.String Email", "System.String Name", "System.Int32 Id"]
        );
    }

    #[test]
    fn test_filter_applies() {
        let mut builder = MetadataBuilder::new("Lib");
        let base = builder.add_type("Lib", "Shape");
        let circle = builder.add_type("Lib", "Circle");
        builder.extends(circle, base);
        let _other: TypeToken = builder.add_type("Lib", "Color");

        let names: Vec<String> = extract(&builder, Some("Shape"))
            .into_iter()
            .map(|d| d.full_name)
            .collect();
        assert_eq!(names, vec!["Lib.Shape".to_string(), "Lib.Circle".to_string()]);
    }
}
