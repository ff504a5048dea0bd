use proc_macro2::*;
use quote::quote;
use syn::*;

/// Automatically implements `MapValue` on structs with named fields, reading and writing the fields in declaration order.
///
/// The record size is the sum of the field sizes (records are packed field by field, there is no implicit padding), and the
/// alignment is the largest field alignment. Order fields so that the size is a multiple of the alignment.
#[proc_macro_derive(MapValue)]
pub fn map_value_derive(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
	let input = parse_macro_input!(input as DeriveInput);
	let ident = input.ident;

	let fields = match input.data {
		Data::Struct(data) => match data.fields {
			Fields::Named(fields) => fields.named,
			Fields::Unnamed(_) => panic!("Tuple structs not supported"),
			Fields::Unit => panic!("Unit structs not supported"),
		},
		_ => panic!("Only structs with named fields are supported"),
	};

	let types: Vec<&Type> = fields.iter().map(|field| &field.ty).collect();
	let field_names: Vec<&Ident> = fields.iter().map(|field| field.ident.as_ref().expect("Ident required")).collect();

	let parse_contents = quote! {
		Ok(Self {
			#(
				#field_names: ::cdmap::ResultDoingJobExt::job(::cdmap::reader::MapValue::map_parse(reader), concat!(
					"Reading field \"",
					stringify!(#field_names),
					"\" on type ",
					stringify!(#ident)
				))?,
			)*
		})
	};

	let write_contents = quote! {
		#( ::cdmap::reader::MapValue::map_write(&self.#field_names, writer); )*
	};

	quote! {
		impl ::cdmap::reader::MapValue for #ident {
			const SIZE: usize = #(<#types as ::cdmap::reader::MapValue>::SIZE + )* 0;
			const ALIGN: usize = {
				let mut align = 1;
				#(
					if <#types as ::cdmap::reader::MapValue>::ALIGN > align {
						align = <#types as ::cdmap::reader::MapValue>::ALIGN;
					}
				)*
				align
			};

			fn map_parse(reader: &mut ::cdmap::reader::MapByteReader) -> ::cdmap::CdmapResult<Self> {
				#parse_contents
			}

			fn map_write(&self, writer: &mut ::cdmap::writer::MapByteWriter) {
				#write_contents
			}
		}
	}
	.into()
}
