//! AVFoundation selectors that cidre does not bind: track languages,
//! metadata items and track associations.

use cidre::{av, ns};
use objc::{
    class, msg_send,
    runtime::{BOOL, NO, Object},
    sel, sel_impl,
};
use reel_media::{MetadataItem, tracks::TrackLabel};

type Id = *mut Object;

const KEY_SPACE_METADATA: &str = "mdta";
const KEY_SPACE_COMMON: &str = "comn";
const COMMON_KEY_TITLE: &str = "title";
const ASSOCIATION_TIMECODE: &str = "tmcd";

fn as_id<T>(value: &T) -> Id {
    value as *const T as *mut Object
}

unsafe fn string(value: Id) -> Option<String> {
    if value.is_null() {
        return None;
    }

    Some(unsafe { &*(value as *const ns::String) }.to_string())
}

unsafe fn array_items(array: Id) -> Vec<Id> {
    if array.is_null() {
        return vec![];
    }

    unsafe {
        let count: usize = msg_send![array, count];
        (0..count)
            .map(|index| msg_send![array, objectAtIndex: index])
            .collect()
    }
}

unsafe fn metadata_item(key_space: &str, key: &str, value: &str) -> Id {
    let key_space = ns::String::with_str(key_space);
    let key = ns::String::with_str(key);
    let value = ns::String::with_str(value);

    unsafe {
        let item: Id = msg_send![class!(AVMutableMetadataItem), metadataItem];
        let _: () = msg_send![item, setKeySpace: as_id(&*key_space)];
        let _: () = msg_send![item, setKey: as_id(&*key)];
        let _: () = msg_send![item, setValue: as_id(&*value)];
        item
    }
}

unsafe fn metadata_array(items: impl IntoIterator<Item = Id>) -> Id {
    unsafe {
        let array: Id = msg_send![class!(NSMutableArray), array];
        for item in items {
            let _: () = msg_send![array, addObject: item];
        }
        array
    }
}

pub(crate) fn set_input_label(input: &av::AssetWriterInput, label: &TrackLabel) {
    let language = ns::String::with_str(&label.language);

    unsafe {
        let input = as_id(input);
        let _: () = msg_send![input, setLanguageCode: as_id(&*language)];
        let _: () = msg_send![input, setExtendedLanguageTag: as_id(&*language)];

        let title = metadata_item(KEY_SPACE_COMMON, COMMON_KEY_TITLE, &label.title);
        let _: () = msg_send![input, setMetadata: metadata_array([title])];
    }
}

pub(crate) fn set_writer_metadata(writer: &av::AssetWriter, items: &[MetadataItem]) {
    unsafe {
        let array = metadata_array(
            items
                .iter()
                .map(|item| metadata_item(KEY_SPACE_METADATA, &item.key, &item.value)),
        );
        let _: () = msg_send![as_id(writer), setMetadata: array];
    }
}

/// Links `video` to `timecode` so players read the video's start time from
/// the timecode track. Returns `false` when AVFoundation refuses the pair.
pub(crate) fn add_timecode_association(
    video: &av::AssetWriterInput,
    timecode: &av::AssetWriterInput,
) -> bool {
    let kind = ns::String::with_str(ASSOCIATION_TIMECODE);

    unsafe {
        let video = as_id(video);
        let timecode = as_id(timecode);

        let allowed: BOOL = msg_send![
            video,
            canAddTrackAssociationWithTrackOfInput: timecode
            type: as_id(&*kind)
        ];
        if allowed == NO {
            return false;
        }

        let _: () = msg_send![
            video,
            addTrackAssociationWithTrackOfInput: timecode
            type: as_id(&*kind)
        ];
    }

    true
}

pub(crate) fn track_label(track: &av::asset::Track) -> Option<TrackLabel> {
    unsafe {
        let track = as_id(track);
        let extended: Id = msg_send![track, extendedLanguageTag];
        let code: Id = msg_send![track, languageCode];
        let language = string(extended).or_else(|| string(code))?;

        let common: Id = msg_send![track, commonMetadata];
        let title = array_items(common)
            .into_iter()
            .find(|item| {
                let key: Id = msg_send![*item, commonKey];
                string(key).as_deref() == Some(COMMON_KEY_TITLE)
            })
            .and_then(|item| {
                let value: Id = msg_send![item, stringValue];
                string(value)
            })
            .unwrap_or_default();

        Some(TrackLabel::new(language, title))
    }
}

pub(crate) fn asset_metadata(asset: &av::UrlAsset) -> Vec<MetadataItem> {
    unsafe {
        let items: Id = msg_send![as_id(asset), metadata];

        array_items(items)
            .into_iter()
            .filter_map(|item| {
                let key: Id = msg_send![item, key];
                if key.is_null() {
                    return None;
                }
                let is_string: BOOL = msg_send![key, isKindOfClass: class!(NSString)];
                if is_string == NO {
                    return None;
                }

                let value: Id = msg_send![item, stringValue];
                Some(MetadataItem::new(string(key)?, string(value)?))
            })
            .collect()
    }
}
