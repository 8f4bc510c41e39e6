//! Well known attribute names, object classes, system index names and
//! tuning defaults.

// Canonical (lower case) attribute names as stored on entries.
pub const ATTR_OBJECTCLASS: &str = "objectclass";
pub const ATTR_ALIASED_OBJECT_NAME: &str = "aliasedobjectname";
pub const ATTR_ENTRYUUID: &str = "entryuuid";
pub const ATTR_ENTRYCSN: &str = "entrycsn";
pub const ATTR_ENTRYPARENTID: &str = "entryparentid";
pub const ATTR_NAME: &str = "name";
pub const ATTR_CN: &str = "cn";
pub const ATTR_SN: &str = "sn";
pub const ATTR_GIVENNAME: &str = "givenname";
pub const ATTR_OU: &str = "ou";
pub const ATTR_O: &str = "o";
pub const ATTR_TITLE: &str = "title";
pub const ATTR_DC: &str = "dc";
pub const ATTR_UID: &str = "uid";
pub const ATTR_MAIL: &str = "mail";
pub const ATTR_DESCRIPTION: &str = "description";
pub const ATTR_TELEPHONENUMBER: &str = "telephonenumber";
pub const ATTR_UIDNUMBER: &str = "uidnumber";
pub const ATTR_GIDNUMBER: &str = "gidnumber";
pub const ATTR_MEMBER: &str = "member";
pub const ATTR_SEEALSO: &str = "seealso";

// Attribute OIDs.
pub const OID_OBJECTCLASS: &str = "2.5.4.0";
pub const OID_ALIASED_OBJECT_NAME: &str = "2.5.4.1";
pub const OID_ENTRYUUID: &str = "1.3.6.1.1.16.4";
pub const OID_ENTRYCSN: &str = "1.3.6.1.4.1.4203.666.1.7";
pub const OID_ENTRYPARENTID: &str = "1.3.6.1.4.1.18060.0.4.1.2.26";

// Object classes, normalised.
pub const OC_TOP: &str = "top";
pub const OC_ALIAS: &str = "alias";
pub const OC_EXTENSIBLE_OBJECT: &str = "extensibleobject";

// System index names. These never collide with an attribute name since
// they are not valid attribute descriptors.
pub const SYS_IDX_PRESENCE: &str = "sys.presence";
pub const SYS_IDX_ONE_LEVEL: &str = "sys.onelevel";
pub const SYS_IDX_SUB_LEVEL: &str = "sys.sublevel";
pub const SYS_IDX_RDN: &str = "sys.rdn";
pub const SYS_IDX_ALIAS: &str = "sys.alias";
pub const SYS_IDX_ONE_ALIAS: &str = "sys.onealias";
pub const SYS_IDX_SUB_ALIAS: &str = "sys.subalias";

/// All system index names, including the value indices on the reserved
/// attributes.
pub const SYSTEM_INDICES: [&str; 10] = [
    SYS_IDX_PRESENCE,
    SYS_IDX_ONE_LEVEL,
    SYS_IDX_SUB_LEVEL,
    SYS_IDX_RDN,
    SYS_IDX_ALIAS,
    SYS_IDX_ONE_ALIAS,
    SYS_IDX_SUB_ALIAS,
    ATTR_OBJECTCLASS,
    ATTR_ENTRYUUID,
    ATTR_ENTRYCSN,
];

pub const MASTER_TABLE_NAME: &str = "master";

// Cache tuning.
pub const DEFAULT_CACHE_TARGET: usize = 2048;
pub const DEFAULT_INDEX_CACHE_SIZE: usize = 100;
pub const MINIMUM_CACHE_SIZE: usize = 16;
