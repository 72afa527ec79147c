// Declarative stand-ins for the schema code generator. Each invocation expands
// to the same shape the generated API types have:
//
// * `tl_type!`     bare constructor, serialized without its ID.
// * `tl_function!` RPC function, serialized with its ID, implements RemoteCall.
// * `tl_enum!`     boxed type, writes/reads the constructor ID and dispatches.

macro_rules! tl_type {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl crate::Serializable for $name {
            #[allow(unused_variables)]
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $( crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl crate::Deserializable for $name {
            #[allow(unused_variables)]
            fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
                $( let $field = <$ty as crate::Deserializable>::deserialize(buf)?; )*
                Ok(Self { $( $field, )* })
            }
        }
    };
}

macro_rules! tl_function {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        } -> $ret:ty
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                crate::Serializable::serialize(&<Self as crate::Identifiable>::CONSTRUCTOR_ID, buf);
                $( crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        // Server side of the exchange: reads the ID back and checks it.
        impl crate::Deserializable for $name {
            fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
                let id = <u32 as crate::Deserializable>::deserialize(buf)?;
                if id != <Self as crate::Identifiable>::CONSTRUCTOR_ID {
                    return Err(crate::deserialize::Error::UnexpectedConstructor { id });
                }
                $( let $field = <$ty as crate::Deserializable>::deserialize(buf)?; )*
                Ok(Self { $( $field, )* })
            }
        }

        impl crate::RemoteCall for $name {
            type Return = $ret;
        }
    };
}

macro_rules! tl_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident ( $ty:ty ) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty), )+
        }

        impl crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $(
                        Self::$variant(x) => {
                            crate::Serializable::serialize(&<$ty as crate::Identifiable>::CONSTRUCTOR_ID, buf);
                            crate::Serializable::serialize(x, buf);
                        }
                    )+
                }
            }
        }

        impl crate::Deserializable for $name {
            fn deserialize(buf: crate::deserialize::Buffer) -> crate::deserialize::Result<Self> {
                let id = <u32 as crate::Deserializable>::deserialize(buf)?;
                $(
                    if id == <$ty as crate::Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty as crate::Deserializable>::deserialize(buf)?));
                    }
                )+
                Err(crate::deserialize::Error::UnexpectedConstructor { id })
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(x: $ty) -> Self { Self::$variant(x) }
            }
        )+
    };
}
