use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::meta::ParseNestedMeta;
use syn::spanned::Spanned;
use syn::{
    Attribute, Data, DeriveInput, Fields, GenericArgument, GenericParam, Ident, Lit, Meta,
    PathArguments, Type, parse_macro_input,
};

/// Check if an attribute list carries a specific attribute
fn has_attr(attrs: &[Attribute], attr_name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(attr_name))
}

fn find_attr<'a>(attrs: &'a [Attribute], attr_name: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|attr| attr.path().is_ident(attr_name))
}

/// Parse `= "..."` following a nested meta path
fn parse_str(meta: &ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    let lit: Lit = meta.input.parse()?;
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new(other.span(), "expected a string literal")),
    }
}

/// Parse an optional `= true|false`; a bare flag means `true`
fn parse_flag(meta: &ParseNestedMeta) -> syn::Result<bool> {
    if !meta.input.peek(syn::Token![=]) {
        return Ok(true);
    }
    meta.input.parse::<syn::Token![=]>()?;
    let lit: Lit = meta.input.parse()?;
    match lit {
        Lit::Bool(b) => Ok(b.value),
        other => Err(syn::Error::new(other.span(), "expected `true` or `false`")),
    }
}

/// Parse the `kind = "..."` argument of a type attribute, if any
fn parse_kind(attr: &Attribute) -> syn::Result<Option<String>> {
    if !matches!(attr.meta, Meta::List(_)) {
        return Ok(None);
    }
    let mut kind = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("kind") {
            kind = Some(parse_str(&meta)?);
            Ok(())
        } else {
            Err(meta.error("expected `kind = \"...\"`"))
        }
    })?;
    Ok(kind)
}

#[derive(Default)]
struct OptionsAttr {
    name: Option<String>,
    indexed: Option<bool>,
    optional: Option<bool>,
}

impl OptionsAttr {
    fn parse_entry(&mut self, meta: &ParseNestedMeta) -> syn::Result<bool> {
        if meta.path.is_ident("name") {
            self.name = Some(parse_str(meta)?);
        } else if meta.path.is_ident("indexed") {
            self.indexed = Some(parse_flag(meta)?);
        } else if meta.path.is_ident("optional") {
            self.optional = Some(parse_flag(meta)?);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Builder calls on a `Property` or `Embedded` definition
    fn field_calls(&self) -> TokenStream2 {
        let name = self.name.as_ref().map(|n| quote! { .mapped_name(#n) });
        let indexed = self.indexed.map(|b| quote! { .indexed(#b) });
        let optional = self.optional.map(|b| quote! { .optional(#b) });
        quote! { #name #indexed #optional }
    }

    /// A `PropertyOptions` value for a property override
    fn options_value(&self) -> TokenStream2 {
        let name = self.name.as_ref().map(|n| quote! { .name(#n) });
        let indexed = self.indexed.map(|b| quote! { .indexed(#b) });
        let optional = self.optional.map(|b| quote! { .optional(#b) });
        quote! { entity_mapping::PropertyOptions::new() #name #indexed #optional }
    }
}

enum DeclarationAttr {
    Entity(Option<String>),
    Projected(String),
    Embeddable,
    MappedSuperclass,
    Plain,
}

struct TypeAttrs {
    declaration: DeclarationAttr,
    override_kind: Option<String>,
    immutable: bool,
    overrides: Vec<(String, OptionsAttr)>,
    listeners: Vec<(Ident, syn::Path)>,
}

fn callback_variant(name: &Ident) -> Option<Ident> {
    let variant = match name.to_string().as_str() {
        "pre_insert" => "PreInsert",
        "post_insert" => "PostInsert",
        "pre_update" => "PreUpdate",
        "post_update" => "PostUpdate",
        "pre_upsert" => "PreUpsert",
        "post_upsert" => "PostUpsert",
        "pre_delete" => "PreDelete",
        "post_delete" => "PostDelete",
        "post_load" => "PostLoad",
        _ => return None,
    };
    Some(format_ident!("{}", variant))
}

fn parse_type_attrs(input: &DeriveInput) -> syn::Result<TypeAttrs> {
    let mut declaration = None;
    let mut set_declaration = |attr: &Attribute, value: DeclarationAttr| {
        if declaration.replace(value).is_some() {
            return Err(syn::Error::new(
                attr.span(),
                "only one of #[entity], #[projected_entity], #[embeddable] or #[mapped_superclass] is allowed",
            ));
        }
        Ok(())
    };

    let mut attrs = TypeAttrs {
        declaration: DeclarationAttr::Plain,
        override_kind: None,
        immutable: false,
        overrides: Vec::new(),
        listeners: Vec::new(),
    };

    for attr in &input.attrs {
        let path = attr.path();
        if path.is_ident("entity") {
            set_declaration(attr, DeclarationAttr::Entity(parse_kind(attr)?))?;
        } else if path.is_ident("projected_entity") {
            let kind = parse_kind(attr)?.unwrap_or_default();
            set_declaration(attr, DeclarationAttr::Projected(kind))?;
        } else if path.is_ident("embeddable") {
            set_declaration(attr, DeclarationAttr::Embeddable)?;
        } else if path.is_ident("mapped_superclass") {
            set_declaration(attr, DeclarationAttr::MappedSuperclass)?;
        } else if path.is_ident("override_kind") {
            let kind = parse_kind(attr)?
                .ok_or_else(|| syn::Error::new(attr.span(), "expected #[override_kind(kind = \"...\")]"))?;
            attrs.override_kind = Some(kind);
        } else if path.is_ident("immutable") {
            attrs.immutable = true;
        } else if path.is_ident("property_override") {
            let mut target = None;
            let mut options = OptionsAttr::default();
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("path") {
                    target = Some(parse_str(&meta)?);
                    Ok(())
                } else if options.parse_entry(&meta)? {
                    Ok(())
                } else {
                    Err(meta.error("expected `path`, `name`, `indexed` or `optional`"))
                }
            })?;
            let target = target
                .ok_or_else(|| syn::Error::new(attr.span(), "property override requires `path = \"...\"`"))?;
            attrs.overrides.push((target, options));
        } else if path.is_ident("listener") {
            attr.parse_nested_meta(|meta| {
                let name = meta
                    .path
                    .get_ident()
                    .ok_or_else(|| meta.error("expected a callback name"))?;
                let variant = callback_variant(name)
                    .ok_or_else(|| meta.error(format!("unknown callback `{}`", name)))?;
                let handler: syn::Path = meta.value()?.parse()?;
                attrs.listeners.push((variant, handler));
                Ok(())
            })?;
        }
    }

    if let Some(declaration) = declaration {
        attrs.declaration = declaration;
    }
    Ok(attrs)
}

enum Role {
    Identifier { auto_generated: bool },
    Key,
    ParentKey,
    Embedded {
        strategy: Option<Ident>,
        options: OptionsAttr,
    },
    Property {
        options: OptionsAttr,
        marker: Option<Ident>,
    },
    Inherit,
    Transient,
}

fn parse_marker(field: &syn::Field) -> syn::Result<Option<Ident>> {
    let mut marker = None;
    for (attr_name, method) in [
        ("version", "version"),
        ("created_timestamp", "created_timestamp"),
        ("updated_timestamp", "updated_timestamp"),
    ] {
        if let Some(attr) = find_attr(&field.attrs, attr_name) {
            if marker.is_some() {
                return Err(syn::Error::new(
                    attr.span(),
                    "a field takes at most one of #[version], #[created_timestamp] or #[updated_timestamp]",
                ));
            }
            marker = Some(format_ident!("{}", method));
        }
    }
    Ok(marker)
}

/// Classify a field; identifier > key > parent key > embedded > property
fn parse_role(field: &syn::Field) -> syn::Result<Role> {
    let attrs = &field.attrs;
    if has_attr(attrs, "transient") {
        return Ok(Role::Transient);
    }
    if has_attr(attrs, "inherit") {
        return Ok(Role::Inherit);
    }
    if let Some(attr) = find_attr(attrs, "identifier") {
        let mut auto_generated = false;
        if matches!(attr.meta, Meta::List(_)) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("auto_generated") {
                    auto_generated = parse_flag(&meta)?;
                    Ok(())
                } else {
                    Err(meta.error("expected `auto_generated`"))
                }
            })?;
        }
        return Ok(Role::Identifier { auto_generated });
    }
    if has_attr(attrs, "key") {
        return Ok(Role::Key);
    }
    if has_attr(attrs, "parent_key") {
        return Ok(Role::ParentKey);
    }
    if let Some(attr) = find_attr(attrs, "embedded") {
        let mut strategy = None;
        let mut options = OptionsAttr::default();
        if matches!(attr.meta, Meta::List(_)) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("imploded") || meta.path.is_ident("exploded") {
                    strategy = meta.path.get_ident().cloned();
                    Ok(())
                } else if options.parse_entry(&meta)? {
                    Ok(())
                } else {
                    Err(meta.error("expected `imploded`, `exploded`, `name`, `indexed` or `optional`"))
                }
            })?;
        }
        return Ok(Role::Embedded { strategy, options });
    }

    let mut options = OptionsAttr::default();
    if let Some(attr) = find_attr(attrs, "property") {
        if matches!(attr.meta, Meta::List(_)) {
            attr.parse_nested_meta(|meta| {
                if options.parse_entry(&meta)? {
                    Ok(())
                } else {
                    Err(meta.error("expected `name`, `indexed` or `optional`"))
                }
            })?;
        }
    }
    Ok(Role::Property {
        options,
        marker: parse_marker(field)?,
    })
}

/// Inner type of `Option<T>`
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    if path.qself.is_some() {
        return None;
    }
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}

/// Name of the generic parameter `ty` consists of, if any
fn type_param_of<'a>(ty: &Type, params: &'a [Ident]) -> Option<&'a Ident> {
    let Type::Path(path) = ty else {
        return None;
    };
    if path.qself.is_some() {
        return None;
    }
    let ident = path.path.get_ident()?;
    params.iter().find(|param| *param == ident)
}

/// Derive macro for the `Mapped` trait
///
/// Generates the schema description of a struct with named fields from
/// type and field attributes.
///
/// ## Type attributes
///
/// - `#[entity]` / `#[entity(kind = "...")]` - root entity; the kind defaults
///   to the type name
/// - `#[projected_entity(kind = "...")]` - read-only view of another kind
/// - `#[embeddable]` - value embedded into an owning entity
/// - `#[mapped_superclass]` - base whose fields are inherited via `#[inherit]`
/// - `#[override_kind(kind = "...")]` - replace the kind of embedding entities
/// - `#[immutable]` - construct through a designated constructor instead of
///   `Default` plus field writers
/// - `#[property_override(path = "...", name = "...", indexed = .., optional = ..)]`
/// - `#[listener(pre_insert = path::to::handler)]` - any callback name in
///   snake case; the handler is `fn(&Self) -> Result<(), ListenerError>`
///
/// ## Field attributes
///
/// - `#[identifier]` / `#[identifier(auto_generated)]`
/// - `#[key]`, `#[parent_key]` - fields of type `Option<Key>`
/// - `#[embedded(imploded|exploded, name = "...", indexed = .., optional)]`
/// - `#[property(name = "...", indexed = .., optional)]` - the default role
/// - `#[version]`, `#[created_timestamp]`, `#[updated_timestamp]`
/// - `#[inherit]` - field holding the mapped-superclass base
/// - `#[transient]` - not mapped
///
/// Mutable types must implement `Default`.
///
/// ## Example
///
/// ```text
/// #[derive(Default, Mapped)]
/// #[entity(kind = "Contacts")]
/// struct Contact {
///     #[identifier(auto_generated)]
///     pub id: i64,
///     pub name: String,
///     #[embedded(imploded)]
///     pub address: Option<Address>,
///     #[version]
///     pub version: i64,
/// }
/// ```
#[proc_macro_derive(
    Mapped,
    attributes(
        entity,
        projected_entity,
        embeddable,
        mapped_superclass,
        override_kind,
        immutable,
        property_override,
        listener,
        identifier,
        key,
        parent_key,
        embedded,
        property,
        version,
        created_timestamp,
        updated_timestamp,
        inherit,
        transient
    )
)]
pub fn derive_mapped(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_mapped(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_mapped(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "Mapped only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new(input.span(), "Mapped only supports structs")),
    };

    let mut type_params = Vec::new();
    for param in &input.generics.params {
        match param {
            GenericParam::Type(param) => type_params.push(param.ident.clone()),
            GenericParam::Lifetime(param) => {
                return Err(syn::Error::new(
                    param.span(),
                    "Mapped types cannot have lifetime parameters",
                ));
            }
            GenericParam::Const(_) => {}
        }
    }

    let attrs = parse_type_attrs(input)?;

    let mut field_defs = Vec::new();
    let mut ctor_names = Vec::new();
    let mut ctor_inits = Vec::new();
    let mut inherit = None;
    let mut field_type_params = Vec::new();
    let mut mapped_type_params = Vec::new();

    for field in fields {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new(field.span(), "expected a named field"))?;
        let field_name = ident.unraw().to_string();
        let ty = &field.ty;

        let writer = |value: TokenStream2| {
            if attrs.immutable {
                quote! {}
            } else {
                quote! { .writer(|t: &mut Self, v| t.#ident = #value) }
            }
        };

        let role = parse_role(field)?;
        let transient = matches!(role, Role::Transient);
        let init = match role {
            Role::Transient => Some(quote! { #ident: ::core::default::Default::default() }),
            Role::Inherit => {
                if inherit.is_some() {
                    return Err(syn::Error::new(
                        field.span(),
                        "only one field can be marked #[inherit]",
                    ));
                }
                if attrs.immutable {
                    return Err(syn::Error::new(
                        field.span(),
                        "immutable types cannot inherit from a mapped superclass",
                    ));
                }
                inherit = Some(quote! {
                    .inherit(|t: &Self| &t.#ident, |t: &mut Self| &mut t.#ident)
                });
                None
            }
            Role::Identifier { auto_generated } => {
                let writer = writer(quote! { v });
                let auto = auto_generated.then(|| quote! { .auto_generated() });
                field_defs.push(quote! {
                    .field(entity_mapping::Identifier::new(#field_name, |t: &Self| &t.#ident) #writer #auto)
                });
                Some(quote! { #ident: args.take(#field_name)? })
            }
            Role::Key | Role::ParentKey => {
                let constructor = if has_attr(&field.attrs, "key") {
                    quote! { key }
                } else {
                    quote! { parent }
                };
                let writer = writer(quote! { v });
                field_defs.push(quote! {
                    .field(entity_mapping::KeyField::#constructor(#field_name, |t: &Self| &t.#ident) #writer)
                });
                Some(quote! { #ident: args.take(#field_name)? })
            }
            Role::Embedded { strategy, options } => {
                let (inner, getter, stored, init) = match option_inner(ty) {
                    Some(inner) => (
                        inner,
                        quote! { t.#ident.as_ref() },
                        quote! { Some(v) },
                        quote! { #ident: args.take_embedded(#field_name)? },
                    ),
                    None => (
                        ty,
                        quote! { Some(&t.#ident) },
                        quote! { v },
                        quote! { #ident: args.require_embedded(#field_name)? },
                    ),
                };
                let generic = type_param_of(inner, &type_params).map(|param| {
                    mapped_type_params.push(param.clone());
                    let param = param.to_string();
                    quote! { .generic(#param) }
                });
                let writer = writer(stored);
                let strategy = strategy.map(|s| quote! { .#s() });
                let options = options.field_calls();
                field_defs.push(quote! {
                    .field(
                        entity_mapping::Embedded::<Self, #inner>::new(#field_name, |t: &Self| #getter)
                            #writer #strategy #options #generic
                    )
                });
                Some(init)
            }
            Role::Property { options, marker } => {
                let generic = type_param_of(ty, &type_params).map(|param| {
                    field_type_params.push(param.clone());
                    let param = param.to_string();
                    quote! { .generic(#param) }
                });
                let writer = writer(quote! { v });
                let marker = marker.map(|m| quote! { .#m() });
                let options = options.field_calls();
                field_defs.push(quote! {
                    .field(
                        entity_mapping::Property::new(#field_name, |t: &Self| &t.#ident)
                            #writer #options #marker #generic
                    )
                });
                Some(quote! { #ident: args.take(#field_name)? })
            }
        };

        if let Some(init) = init {
            if !transient {
                ctor_names.push(field_name);
            }
            ctor_inits.push(init);
        }
    }

    let declaration = match &attrs.declaration {
        DeclarationAttr::Entity(kind) => {
            let kind = kind.as_ref().map(|k| quote! { .kind(#k) });
            quote! { entity_mapping::Schema::entity() #kind }
        }
        DeclarationAttr::Projected(kind) => quote! { entity_mapping::Schema::projected(#kind) },
        DeclarationAttr::Embeddable => quote! { entity_mapping::Schema::embeddable() },
        DeclarationAttr::MappedSuperclass => quote! { entity_mapping::Schema::mapped_superclass() },
        DeclarationAttr::Plain => quote! { entity_mapping::Schema::plain() },
    };
    let override_kind = attrs
        .override_kind
        .as_ref()
        .map(|kind| quote! { .override_kind(#kind) });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut predicates = Vec::new();
    for param in &type_params {
        predicates.push(quote! {
            #param: ::core::any::Any + ::core::marker::Send + ::core::marker::Sync
        });
    }
    for param in &field_type_params {
        predicates.push(quote! { #param: entity_mapping::FieldType });
    }
    for param in &mapped_type_params {
        predicates.push(quote! { #param: entity_mapping::Mapped });
    }

    let construction = if attrs.immutable {
        quote! {
            .immutable()
            .constructor(&[#(#ctor_names),*], |args| {
                Ok(Self {
                    #(#ctor_inits),*
                })
            })
        }
    } else {
        predicates.push(quote! { #name #ty_generics: ::core::default::Default });
        quote! { .instantiate_with(<Self as ::core::default::Default>::default) }
    };

    let type_parameters = type_params.iter().map(|param| {
        let param_name = param.to_string();
        quote! { .type_parameter::<#param>(#param_name) }
    });

    let overrides = attrs.overrides.iter().map(|(path, options)| {
        let options = options.options_value();
        quote! { .property_override(#path, #options) }
    });

    let listeners = attrs.listeners.iter().map(|(variant, handler)| {
        quote! { .listener(entity_mapping::CallbackType::#variant, #handler) }
    });

    let mut all_predicates: Vec<TokenStream2> = where_clause
        .map(|clause| clause.predicates.iter().map(|p| quote! { #p }).collect())
        .unwrap_or_default();
    all_predicates.extend(predicates);
    let where_clause = if all_predicates.is_empty() {
        quote! {}
    } else {
        quote! { where #(#all_predicates),* }
    };

    Ok(quote! {
        impl #impl_generics entity_mapping::Mapped for #name #ty_generics #where_clause {
            fn schema() -> entity_mapping::Schema<Self> {
                #declaration
                    #override_kind
                    #construction
                    #(#type_parameters)*
                    #inherit
                    #(#overrides)*
                    #(#field_defs)*
                    #(#listeners)*
            }
        }
    })
}
